use braid_reactor::ReactorError;
use braid_store::StoreError;

use crate::env::ConfigError;
use crate::mirror::MirrorError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing env/registry configuration. Fatal; never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The supplied identifier matched nothing and creation was not
    /// permitted. Fatal for this trigger.
    #[error("context resolution failed: {0}")]
    ContextResolution(String),

    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("{0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_collaborator_errors() {
        let err: EngineError = StoreError::NotFound("item x".into()).into();
        assert!(matches!(err, EngineError::Store(_)));

        let err: EngineError = ReactorError::Network("refused".into()).into();
        assert!(matches!(err, EngineError::Reactor(_)));

        let err: EngineError = ConfigError::MissingOrgId.into();
        assert!(err.to_string().contains("configuration error"));
    }
}
