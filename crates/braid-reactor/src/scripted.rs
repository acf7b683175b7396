use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::ReactorError;
use crate::reactor::{ReactionResult, Reactor, ReactorCall, ScriptedReaction};

/// One pre-programmed step: a static reaction, or a function of the call
/// parameters for steps that need to inspect history or iteration.
pub enum ScriptedStep {
    Payload(ScriptedReaction),
    Func(Box<dyn Fn(&ReactorCall) -> ScriptedReaction + Send + Sync>),
}

impl ScriptedStep {
    pub fn func(f: impl Fn(&ReactorCall) -> ScriptedReaction + Send + Sync + 'static) -> Self {
        Self::Func(Box::new(f))
    }
}

impl From<ScriptedReaction> for ScriptedStep {
    fn from(reaction: ScriptedReaction) -> Self {
        Self::Payload(reaction)
    }
}

/// Deterministic reactor for tests and rehearsals: each invocation consumes
/// the next step in order, no network or model call involved.
///
/// With `repeat_last`, the final step answers every invocation past the end
/// of the list; without it, running past the end is
/// [`ReactorError::ScriptExhausted`].
pub struct ScriptedReactor {
    steps: Vec<ScriptedStep>,
    cursor: AtomicUsize,
    repeat_last: bool,
}

impl ScriptedReactor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps,
            cursor: AtomicUsize::new(0),
            repeat_last: false,
        }
    }

    pub fn repeat_last(mut self, repeat_last: bool) -> Self {
        self.repeat_last = repeat_last;
        self
    }

    /// How many times the reactor has been invoked.
    pub fn invocations(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Reactor for ScriptedReactor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn react(&self, call: &ReactorCall) -> Result<ReactionResult, ReactorError> {
        let invocation = self.cursor.fetch_add(1, Ordering::Relaxed);

        let index = if invocation < self.steps.len() {
            invocation
        } else if self.repeat_last && !self.steps.is_empty() {
            self.steps.len() - 1
        } else {
            return Err(ReactorError::ScriptExhausted {
                index: invocation,
                steps: self.steps.len(),
            });
        };

        let reaction = match &self.steps[index] {
            ScriptedStep::Payload(reaction) => reaction.clone(),
            ScriptedStep::Func(f) => f(call),
        };

        Ok(reaction.normalize(call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::test_support::call_fixture;

    fn two_step_script() -> Vec<ScriptedStep> {
        vec![
            ScriptedReaction::text("A").into(),
            ScriptedReaction::text("B").into(),
        ]
    }

    #[tokio::test]
    async fn steps_are_consumed_in_order_then_exhaust() {
        let reactor = ScriptedReactor::new(two_step_script());
        let call = call_fixture();

        let first = reactor.react(&call).await.unwrap();
        assert_eq!(first.assistant_item.text(), "A");

        let second = reactor.react(&call).await.unwrap();
        assert_eq!(second.assistant_item.text(), "B");

        let third = reactor.react(&call).await;
        assert_eq!(
            third.unwrap_err(),
            ReactorError::ScriptExhausted { index: 2, steps: 2 }
        );
    }

    #[tokio::test]
    async fn repeat_last_reuses_the_final_step() {
        let reactor = ScriptedReactor::new(two_step_script()).repeat_last(true);
        let call = call_fixture();

        let _ = reactor.react(&call).await.unwrap();
        let _ = reactor.react(&call).await.unwrap();
        let third = reactor.react(&call).await.unwrap();
        assert_eq!(third.assistant_item.text(), "B");
        assert_eq!(reactor.invocations(), 3);
    }

    #[tokio::test]
    async fn empty_script_exhausts_immediately_even_with_repeat_last() {
        let reactor = ScriptedReactor::new(Vec::new()).repeat_last(true);
        let call = call_fixture();
        assert_eq!(
            reactor.react(&call).await.unwrap_err(),
            ReactorError::ScriptExhausted { index: 0, steps: 0 }
        );
    }

    #[tokio::test]
    async fn function_steps_see_the_call() {
        let reactor = ScriptedReactor::new(vec![ScriptedStep::func(|call| {
            ScriptedReaction::text(format!("iteration {}", call.iteration))
        })]);
        let call = call_fixture();
        let result = reactor.react(&call).await.unwrap();
        assert_eq!(result.assistant_item.text(), "iteration 0");
    }

    #[tokio::test]
    async fn normalized_output_lands_on_the_reaction_item_id() {
        let reactor = ScriptedReactor::new(vec![ScriptedReaction::text("hello").into()]);
        let call = call_fixture();
        let result = reactor.react(&call).await.unwrap();
        assert_eq!(result.assistant_item.id, call.reaction_item_id);
    }
}
