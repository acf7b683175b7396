use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use secrecy::SecretString;
use tracing::debug;

use braid_core::ids::RunId;
use braid_store::{Database, SqliteStore, StoreError, ThreadStore};

/// Backend configuration for one durable run: where the store lives and,
/// optionally, the mirror target. Opaque to steps; they hand it back to the
/// registry to get a runtime.
#[derive(Clone, Debug)]
pub struct RunEnv {
    pub db_path: String,
    pub org_id: Option<String>,
    pub mirror_base_url: Option<String>,
    pub mirror_token: Option<SecretString>,
}

impl RunEnv {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            org_id: None,
            mirror_base_url: None,
            mirror_token: None,
        }
    }

    /// Read the env from process variables: `BRAID_DB_PATH` (required),
    /// `BRAID_ORG_ID`, `BRAID_MIRROR_BASE_URL`, `BRAID_MIRROR_TOKEN`.
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("BRAID_DB_PATH").map_err(|_| ConfigError::MissingDbPath)?;
        Ok(Self {
            db_path,
            org_id: std::env::var("BRAID_ORG_ID").ok(),
            mirror_base_url: std::env::var("BRAID_MIRROR_BASE_URL").ok(),
            mirror_token: std::env::var("BRAID_MIRROR_TOKEN").ok().map(SecretString::from),
        })
    }
}

/// Missing configuration is fatal and never retried; these errors surface
/// immediately rather than letting a step proceed with an undefined backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no run environment registered for {0} and no process-wide default")]
    EnvNotRegistered(String),

    #[error("BRAID_DB_PATH is not set")]
    MissingDbPath,

    #[error("mirror org id is not configured (BRAID_ORG_ID)")]
    MissingOrgId,

    #[error("mirror base URL is not configured (BRAID_MIRROR_BASE_URL)")]
    MissingMirrorBaseUrl,

    #[error("mirror token is not configured (BRAID_MIRROR_TOKEN)")]
    MissingMirrorToken,
}

/// A fully-constructed backend: one store handle per resolved identity,
/// shared by every context bound to it.
pub struct Runtime {
    pub store: Arc<dyn ThreadStore>,
}

impl Runtime {
    fn open(env: &RunEnv) -> Result<Self, StoreError> {
        let db = if env.db_path == ":memory:" {
            Database::in_memory()?
        } else {
            Database::open(Path::new(&env.db_path))?
        };
        Ok(Self { store: Arc::new(SqliteStore::new(db)) })
    }
}

/// Resolves, per durable run, which backend a step binds to.
///
/// Steps may execute in a different process than the one that started the
/// run, so the starting process registers the env under the run id and a
/// resuming step resolves it explicitly — an instance handle threaded
/// through calls, not a process-global. The process-wide default covers
/// single-backend deployments. A second-level cache maps backend identity
/// (db path) to a constructed [`Runtime`] so repeated resolution reuses one
/// store connection.
pub struct EnvRegistry {
    envs: DashMap<String, RunEnv>,
    default_env: RwLock<Option<RunEnv>>,
    runtimes: DashMap<String, Arc<Runtime>>,
}

impl EnvRegistry {
    pub fn new() -> Self {
        Self {
            envs: DashMap::new(),
            default_env: RwLock::new(None),
            runtimes: DashMap::new(),
        }
    }

    /// Store the env under `run_id`, or as the process-wide default when no
    /// run id is given.
    pub fn register(&self, env: RunEnv, run_id: Option<&RunId>) {
        match run_id {
            Some(id) => {
                debug!(run_id = %id, "run environment registered");
                self.envs.insert(id.as_str().to_string(), env);
            }
            None => {
                *self.default_env.write() = Some(env);
            }
        }
    }

    /// Look up the env for `run_id`, falling back to the process default.
    pub fn resolve(&self, run_id: Option<&RunId>) -> Result<RunEnv, ConfigError> {
        if let Some(id) = run_id {
            if let Some(env) = self.envs.get(id.as_str()) {
                return Ok(env.clone());
            }
        }
        self.default_env.read().clone().ok_or_else(|| {
            ConfigError::EnvNotRegistered(
                run_id.map(|id| id.as_str().to_string()).unwrap_or_else(|| "<no run id>".into()),
            )
        })
    }

    /// The runtime for `env`, constructing and caching it on first use.
    pub fn runtime(&self, env: &RunEnv) -> Result<Arc<Runtime>, StoreError> {
        if let Some(rt) = self.runtimes.get(&env.db_path) {
            return Ok(Arc::clone(&rt));
        }
        let built = Arc::new(Runtime::open(env)?);
        let entry = self.runtimes.entry(env.db_path.clone()).or_insert(built);
        Ok(Arc::clone(&entry))
    }
}

impl Default for EnvRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_the_run_entry_over_the_default() {
        let registry = EnvRegistry::new();
        registry.register(RunEnv::new("/tmp/default.db"), None);

        let run_id = RunId::new();
        registry.register(RunEnv::new("/tmp/run.db"), Some(&run_id));

        assert_eq!(registry.resolve(Some(&run_id)).unwrap().db_path, "/tmp/run.db");
        assert_eq!(registry.resolve(None).unwrap().db_path, "/tmp/default.db");
    }

    #[test]
    fn unknown_run_falls_back_to_the_default() {
        let registry = EnvRegistry::new();
        registry.register(RunEnv::new("/tmp/default.db"), None);
        let unknown = RunId::new();
        assert_eq!(registry.resolve(Some(&unknown)).unwrap().db_path, "/tmp/default.db");
    }

    #[test]
    fn resolve_without_any_env_is_a_named_config_error() {
        let registry = EnvRegistry::new();
        let run_id = RunId::new();
        let err = registry.resolve(Some(&run_id)).unwrap_err();
        assert_eq!(err, ConfigError::EnvNotRegistered(run_id.as_str().to_string()));
        assert!(err.to_string().contains(run_id.as_str()));
    }

    #[test]
    fn runtime_is_cached_per_backend_identity() {
        let registry = EnvRegistry::new();
        let env = RunEnv::new(":memory:");

        let a = registry.runtime(&env).unwrap();
        let b = registry.runtime(&env).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn runtime_store_is_usable() {
        let registry = EnvRegistry::new();
        let env = RunEnv::new(":memory:");
        let rt = registry.runtime(&env).unwrap();

        let ctx = rt.store.create_context(None, serde_json::json!({})).unwrap();
        let found = rt
            .store
            .get_context(&braid_core::context::ContextIdentifier::Id(ctx.id.clone()))
            .unwrap();
        assert_eq!(found.map(|c| c.id), Some(ctx.id));
    }
}
