use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ContextId, ExecutionId, ItemId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Executing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One trigger→reaction cycle against a context.
///
/// Invariant: at most one execution is current per context at a time; the
/// engine serializes concurrent triggers for the same context rather than
/// interleaving them, because the reactor reads and writes the same content
/// blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub context_id: ContextId,
    pub trigger_item_id: ItemId,
    pub reaction_item_id: ItemId,
    /// Monotonically increasing within the context's active execution.
    pub iteration: u32,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(ExecutionStatus::Executing.as_str(), "executing");
        assert_eq!(ExecutionStatus::Completed.as_str(), "completed");
        assert_eq!(ExecutionStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn execution_serde_roundtrip() {
        let exec = Execution {
            id: ExecutionId::new(),
            context_id: ContextId::new(),
            trigger_item_id: ItemId::new(),
            reaction_item_id: ItemId::new(),
            iteration: 3,
            status: ExecutionStatus::Completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&exec).unwrap();
        let back: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exec);
    }
}
