use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use braid_core::context::StoredContext;
use braid_core::execution::Execution;
use braid_core::ids::ContextId;
use braid_core::items::Item;

use crate::env::{ConfigError, RunEnv};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One replicated write, in engine issue order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MirrorWrite {
    #[serde(rename = "context.upsert")]
    ContextUpsert { context: StoredContext },

    #[serde(rename = "item.upsert")]
    ItemUpsert {
        #[serde(rename = "contextId")]
        context_id: ContextId,
        item: Item,
    },

    #[serde(rename = "item.update")]
    ItemUpdate { item: Item },

    #[serde(rename = "execution.upsert")]
    ExecutionUpsert { execution: Execution },
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("mirror request failed: {0}")]
    Network(String),

    #[error("mirror write rejected with status {status}: {body}")]
    WriteFailed { status: u16, body: String },
}

/// The three pieces the mirror endpoint requires. Any missing piece is a
/// hard, named configuration error — never a silent skip.
pub struct MirrorConfig {
    pub org_id: String,
    pub base_url: String,
    pub token: SecretString,
}

impl MirrorConfig {
    pub fn resolve(env: &RunEnv) -> Result<Self, ConfigError> {
        let org_id = env.org_id.clone().ok_or(ConfigError::MissingOrgId)?;
        let base_url = env
            .mirror_base_url
            .clone()
            .ok_or(ConfigError::MissingMirrorBaseUrl)?;
        let token = env.mirror_token.clone().ok_or(ConfigError::MissingMirrorToken)?;
        Ok(Self {
            org_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[derive(Serialize)]
struct MirrorBody<'a> {
    #[serde(rename = "orgId")]
    org_id: &'a str,
    writes: &'a [MirrorWrite],
}

/// Replicates local writes to the external system of record.
///
/// One POST per batch, no internal retry: a failure propagates so the
/// durable-step substrate retries the whole mirror step, and the endpoint's
/// upsert semantics absorb the replay.
pub struct MirrorClient {
    client: Client,
}

impl MirrorClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    #[instrument(skip(self, env, writes), fields(writes = writes.len()))]
    pub async fn mirror(&self, env: &RunEnv, writes: &[MirrorWrite]) -> Result<(), MirrorError> {
        // Empty batches are a no-op, checked before configuration so a
        // mirror-less deployment never trips on missing credentials.
        if writes.is_empty() {
            return Ok(());
        }

        let config = MirrorConfig::resolve(env)?;
        let url = format!("{}/api/thread", config.base_url);

        let resp = self
            .client
            .post(&url)
            .header(
                "authorization",
                format!("Bearer {}", config.token.expose_secret()),
            )
            .json(&MirrorBody { org_id: &config.org_id, writes })
            .send()
            .await
            .map_err(|e| MirrorError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MirrorError::WriteFailed { status, body });
        }

        debug!(count = writes.len(), "mirror batch accepted");
        Ok(())
    }
}

impl Default for MirrorClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured_env() -> RunEnv {
        let mut env = RunEnv::new(":memory:");
        env.org_id = Some("org_1".into());
        // Nothing listens here; tests below never reach the network.
        env.mirror_base_url = Some("http://127.0.0.1:1/".into());
        env.mirror_token = Some(SecretString::from("tok"));
        env
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op_without_config() {
        let client = MirrorClient::new();
        // Entirely unconfigured env: still fine for an empty batch.
        let env = RunEnv::new(":memory:");
        assert!(client.mirror(&env, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn missing_org_id_fails_before_any_network_call() {
        let client = MirrorClient::new();
        let mut env = configured_env();
        env.org_id = None;

        let err = client
            .mirror(&env, &[MirrorWrite::ItemUpdate { item: Item::input_text("web", "x") }])
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Config(ConfigError::MissingOrgId)));
    }

    #[tokio::test]
    async fn missing_base_url_and_token_are_named_errors() {
        let client = MirrorClient::new();
        let write = MirrorWrite::ItemUpdate { item: Item::input_text("web", "x") };

        let mut env = configured_env();
        env.mirror_base_url = None;
        assert!(matches!(
            client.mirror(&env, std::slice::from_ref(&write)).await.unwrap_err(),
            MirrorError::Config(ConfigError::MissingMirrorBaseUrl)
        ));

        let mut env = configured_env();
        env.mirror_token = None;
        assert!(matches!(
            client.mirror(&env, &[write]).await.unwrap_err(),
            MirrorError::Config(ConfigError::MissingMirrorToken)
        ));
    }

    #[test]
    fn writes_serialize_with_kind_tags() {
        let item = Item::input_text("web", "hi");
        let write = MirrorWrite::ItemUpsert {
            context_id: ContextId::from_raw("ctx_1"),
            item: item.clone(),
        };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["kind"], "item.upsert");
        assert_eq!(json["contextId"], "ctx_1");
        assert_eq!(json["item"]["id"], item.id.as_str());

        let json = serde_json::to_value(MirrorWrite::ItemUpdate { item }).unwrap();
        assert_eq!(json["kind"], "item.update");
    }

    #[test]
    fn body_shape_matches_the_endpoint_contract() {
        let writes = vec![MirrorWrite::ContextUpsert {
            context: StoredContext::new(Some("k".into()), serde_json::json!({})),
        }];
        let body = serde_json::to_value(MirrorBody { org_id: "org_1", writes: &writes }).unwrap();
        assert_eq!(body["orgId"], "org_1");
        assert_eq!(body["writes"][0]["kind"], "context.upsert");
    }

    #[test]
    fn config_resolve_normalizes_trailing_slash() {
        let config = MirrorConfig::resolve(&configured_env()).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:1");
    }
}
