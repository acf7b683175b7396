use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializable, model-facing description of one action: what the reactor
/// advertises to the model so it can emit tool calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the call arguments.
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_camel_case() {
        let spec = ToolSpec::new(
            "search",
            "Search the corpus",
            serde_json::json!({ "type": "object", "properties": { "q": { "type": "string" } } }),
        );
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["name"], "search");
        assert!(json.get("inputSchema").is_some());
        let back: ToolSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
