use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ContextId;

/// Selector for an existing or to-be-created context: a concrete id, or a
/// human-assigned key used for alternate lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextIdentifier {
    Id(ContextId),
    Key(String),
}

impl ContextIdentifier {
    pub fn id(id: ContextId) -> Self {
        Self::Id(id)
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }
}

/// One ongoing conversation. `content` is an opaque, reactor-defined state
/// blob; the engine patches it but never interprets it. Contexts are never
/// deleted by the engine itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredContext {
    pub id: ContextId,
    pub key: Option<String>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredContext {
    /// A fresh context with a generated id.
    pub fn new(key: Option<String>, content: Value) -> Self {
        let now = Utc::now();
        Self {
            id: ContextId::new(),
            key,
            content,
            created_at: now,
            updated_at: now,
        }
    }
}
