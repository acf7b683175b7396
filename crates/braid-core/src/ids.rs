use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ContextId, "ctx");
branded_id!(ItemId, "item");
branded_id!(ExecutionId, "exec");
branded_id!(ToolCallId, "call");
branded_id!(RunId, "run");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_has_prefix() {
        let id = ContextId::new();
        assert!(id.as_str().starts_with("ctx_"), "got: {id}");
    }

    #[test]
    fn item_id_has_prefix() {
        let id = ItemId::new();
        assert!(id.as_str().starts_with("item_"), "got: {id}");
    }

    #[test]
    fn execution_id_has_prefix() {
        let id = ExecutionId::new();
        assert!(id.as_str().starts_with("exec_"), "got: {id}");
    }

    #[test]
    fn tool_call_id_has_prefix() {
        let id = ToolCallId::new();
        assert!(id.as_str().starts_with("call_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ContextId::new();
        let s = id.to_string();
        let parsed: ContextId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ExecutionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ToolCallId::from_raw("c1");
        assert_eq!(id.as_str(), "c1");
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<ItemId> = (0..100).map(|_| ItemId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
