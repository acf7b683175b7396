use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use braid_core::ids::{ContextId, ExecutionId};
use braid_core::toolcalls::{ActionOutcome, ToolCall};
use braid_core::tools::ToolSpec;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Failed(String),
}

/// What an action sees about the turn it runs inside. The context content
/// is a read-only snapshot; actions never write to the store themselves.
#[derive(Clone, Debug)]
pub struct ActionContext {
    pub context_id: ContextId,
    pub execution_id: ExecutionId,
    pub iteration: u32,
    pub context_content: Value,
}

/// One host-supplied capability the reactor may request by name.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Model-facing description advertised to the reactor.
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: Value, ctx: &ActionContext) -> Result<Value, ActionError>;
}

/// Registry of available actions, keyed by name.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self { actions: HashMap::new() }
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.actions.len()
    }

    /// Tool specs for the reactor, sorted by name for stable prompts.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.actions.values().map(|a| a.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute one tool call. Local failures — unknown tool, execute error —
    /// become a `Failure` outcome that settles the call as `output-error`;
    /// one failing tool never aborts the turn.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ActionContext) -> ActionOutcome {
        let Some(action) = self.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "tool call for unregistered action");
            return ActionOutcome::Failure {
                message: format!("unknown tool: {}", call.tool_name),
            };
        };

        match action.execute(call.args.clone(), ctx).await {
            Ok(result) => ActionOutcome::Success { result },
            Err(e) => ActionOutcome::Failure { message: e.to_string() },
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Echoes its arguments back. The standard test action.
    pub struct EchoAction;

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", "Echo the arguments", serde_json::json!({ "type": "object" }))
        }

        async fn execute(&self, args: Value, _ctx: &ActionContext) -> Result<Value, ActionError> {
            Ok(serde_json::json!({ "echo": args }))
        }
    }

    /// Always fails. For exercising the error-settlement path.
    pub struct FailingAction;

    #[async_trait]
    impl Action for FailingAction {
        fn name(&self) -> &str {
            "explode"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new("explode", "Always fails", serde_json::json!({ "type": "object" }))
        }

        async fn execute(&self, _args: Value, _ctx: &ActionContext) -> Result<Value, ActionError> {
            Err(ActionError::Failed("explode always fails".into()))
        }
    }

    pub fn ctx_fixture() -> ActionContext {
        ActionContext {
            context_id: ContextId::new(),
            execution_id: ExecutionId::new(),
            iteration: 0,
            context_content: serde_json::json!({}),
        }
    }
}
