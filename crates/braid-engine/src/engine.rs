use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use braid_core::context::{ContextIdentifier, StoredContext};
use braid_core::execution::{Execution, ExecutionStatus};
use braid_core::ids::{ContextId, ExecutionId, ItemId};
use braid_core::items::{Item, ItemStatus};
use braid_core::toolcalls::{self, ToolCall};
use braid_reactor::{Reactor, ReactorCall};
use braid_store::{StoreError, ThreadStore};

use crate::actions::{ActionContext, ActionRegistry};
use crate::env::RunEnv;
use crate::error::EngineError;
use crate::mirror::{MirrorClient, MirrorWrite};
use crate::stream::ThreadStream;

/// Phases of one turn, in order. Used in tracing output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    ResolvingContext,
    Reacting,
    ReconcilingTools,
    DecidingContinuation,
    Finalizing,
    Done,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolvingContext => "resolving-context",
            Self::Reacting => "reacting",
            Self::ReconcilingTools => "reconciling-tools",
            Self::DecidingContinuation => "deciding-continuation",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

/// Per-turn knobs with conservative defaults.
#[derive(Clone, Debug)]
pub struct TurnOptions {
    /// Upper bound on reactor iterations for one trigger. Reaching it is a
    /// normal terminal condition, not an error.
    pub max_model_steps: u32,
    /// Emit the terminal `finish` chunk during finalization.
    pub send_finish: bool,
    /// Leave the stream open after finalization (shared physical stream).
    pub keep_open: bool,
    /// Run without any stream output.
    pub silent: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_model_steps: 8,
            send_finish: true,
            keep_open: false,
            silent: false,
        }
    }
}

/// Caller-supplied continuation predicate:
/// `(iteration, max_model_steps, reaction_item) -> continue?`.
pub type ShouldContinue = Arc<dyn Fn(u32, u32, &Item) -> bool + Send + Sync>;

/// Parameters for one [`ThreadEngine::react`] call.
#[derive(Clone)]
pub struct ReactParams {
    /// Which context the trigger belongs to. `None` mints a fresh keyless
    /// context for this turn.
    pub identifier: Option<ContextIdentifier>,
    pub create_if_missing: bool,
    /// Content blob for a context created by this trigger.
    pub initial_content: Value,
    pub model: String,
    pub system_prompt: Option<String>,
    pub options: TurnOptions,
    pub should_continue: Option<ShouldContinue>,
    pub stream: ThreadStream,
}

impl Default for ReactParams {
    fn default() -> Self {
        Self {
            identifier: None,
            create_if_missing: true,
            initial_content: Value::Object(Default::default()),
            model: "default".into(),
            system_prompt: None,
            options: TurnOptions::default(),
            should_continue: None,
            stream: ThreadStream::disabled(),
        }
    }
}

/// What a completed turn produced.
#[derive(Clone, Debug)]
pub struct ReactOutcome {
    pub context_id: ContextId,
    pub context: StoredContext,
    pub trigger_item_id: ItemId,
    pub reaction_item_id: ItemId,
    pub execution_id: ExecutionId,
    /// How many reactor iterations ran.
    pub iterations: u32,
}

/// Built-in continuation rule: keep going only while iteration budget
/// remains AND some tool call on the reaction item has not settled. Budget
/// exhaustion is the authoritative stop — a permanently stuck tool cannot
/// loop forever.
fn default_should_continue(iteration: u32, max_model_steps: u32, reaction_item: &Item) -> bool {
    if iteration + 1 >= max_model_steps {
        return false;
    }
    toolcalls::extract_tool_calls(&reaction_item.content.parts)
        .iter()
        .any(|call| !toolcalls::call_settled(reaction_item, call))
}

/// The turn state machine: resolves a context, invokes the reactor,
/// reconciles tool calls, decides continuation, finalizes the stream, and
/// mirrors the turn's writes.
///
/// Concurrent triggers for the same context are queued, never interleaved:
/// the reactor reads and writes the same content blob, so a context has at
/// most one active execution at a time.
pub struct ThreadEngine {
    store: Arc<dyn ThreadStore>,
    reactor: Arc<dyn Reactor>,
    actions: Arc<ActionRegistry>,
    env: RunEnv,
    mirror: Option<MirrorClient>,
    context_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ThreadEngine {
    pub fn new(store: Arc<dyn ThreadStore>, reactor: Arc<dyn Reactor>, env: RunEnv) -> Self {
        Self {
            store,
            reactor,
            actions: Arc::new(ActionRegistry::new()),
            env,
            mirror: None,
            context_locks: DashMap::new(),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    /// Enable write mirroring. Once enabled, missing mirror configuration
    /// is a hard error at finalize time, never a silent skip.
    pub fn with_mirror(mut self, mirror: MirrorClient) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Run one turn for `trigger`.
    #[instrument(skip(self, trigger, params), fields(channel = %trigger.channel))]
    pub async fn react(
        &self,
        trigger: Item,
        params: ReactParams,
    ) -> Result<ReactOutcome, EngineError> {
        let stream = if params.options.silent {
            ThreadStream::disabled()
        } else {
            params.stream.clone()
        };

        debug!(phase = TurnPhase::ResolvingContext.as_str(), "turn started");
        let context = self.resolve_context(&params)?;
        let context_id = context.id.clone();

        // Turns serialize on the canonical context id, so a trigger
        // addressed by key and a concurrent one addressed by the same
        // context's id contend on one lock, held for the whole turn.
        let lock = self.context_lock(&context_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.run_turn(context, trigger, &params, &stream).await
        };
        drop(lock);
        self.prune_context_lock(&context_id);
        outcome
    }

    /// One locked turn: append the trigger, run the iteration loop,
    /// finalize, mirror.
    async fn run_turn(
        &self,
        context: StoredContext,
        trigger: Item,
        params: &ReactParams,
        stream: &ThreadStream,
    ) -> Result<ReactOutcome, EngineError> {
        // The content blob may have moved while this turn waited for the
        // lock; re-read it before the reactor sees it.
        let context = self
            .store
            .get_context(&ContextIdentifier::Id(context.id.clone()))?
            .unwrap_or(context);

        let trigger = self.store.append_item(&context.id, &trigger)?;
        let reaction_item_id = ItemId::new();
        let execution =
            self.store
                .create_execution(&context.id, &trigger.id, &reaction_item_id)?;

        stream.write_context_id(&context.id).await;
        stream.write_ping("thread-start").await;

        let (mut reaction_item, iterations) = match self
            .run_iterations(&context, &trigger, &execution, params, stream)
            .await
        {
            Ok(done) => done,
            Err(e) => return Err(self.fail_turn(&execution.id, stream, e).await),
        };

        debug!(
            phase = TurnPhase::Finalizing.as_str(),
            execution_id = %execution.id,
            iterations,
        );
        reaction_item.status = ItemStatus::Completed;
        let reaction_item = match self.store.update_item(&reaction_item.id, &reaction_item) {
            Ok(item) => item,
            Err(e) => return Err(self.fail_turn(&execution.id, stream, e.into()).await),
        };
        if let Err(e) =
            self.store
                .update_execution(&execution.id, ExecutionStatus::Completed, iterations - 1)
        {
            return Err(self.fail_turn(&execution.id, stream, e.into()).await);
        }

        stream
            .finalize(params.options.send_finish, params.options.keep_open)
            .await;

        // The execution is already complete; a mirror failure propagates so
        // the step substrate retries just the mirror write.
        self.mirror_turn(&context, &trigger, &reaction_item, &execution.id)
            .await?;

        debug!(phase = TurnPhase::Done.as_str(), context_id = %context.id);
        Ok(ReactOutcome {
            context_id: context.id.clone(),
            context,
            trigger_item_id: trigger.id,
            reaction_item_id,
            execution_id: execution.id,
            iterations,
        })
    }

    /// The reacting → reconciling → deciding loop. Returns the reaction
    /// item (still pending) and how many iterations ran.
    async fn run_iterations(
        &self,
        context: &StoredContext,
        trigger: &Item,
        execution: &Execution,
        params: &ReactParams,
        stream: &ThreadStream,
    ) -> Result<(Item, u32), EngineError> {
        let max_model_steps = params.options.max_model_steps.max(1);
        let mut iteration: u32 = 0;

        loop {
            debug!(
                phase = TurnPhase::Reacting.as_str(),
                context_id = %context.id,
                execution_id = %execution.id,
                iteration,
            );

            let history = self
                .store
                .get_items(&ContextIdentifier::Id(context.id.clone()))?;
            let messages = self.store.items_to_model_messages(&history);

            let call = ReactorCall {
                context: context.clone(),
                trigger: trigger.clone(),
                model: params.model.clone(),
                system_prompt: params.system_prompt.clone(),
                messages,
                tools: self.actions.specs(),
                reaction_item_id: execution.reaction_item_id.clone(),
                execution_id: execution.id.clone(),
                context_id: context.id.clone(),
                iteration,
                max_model_steps,
                silent: params.options.silent,
            };
            let result = self.reactor.react(&call).await?;

            // Persist partial progress before any tool runs. The reaction
            // item id is stable, so a later iteration (or a retried step
            // that already appended) merges instead of duplicating.
            let mut reaction_item = match self.store.get_item(&execution.reaction_item_id)? {
                Some(mut existing) => {
                    existing
                        .content
                        .parts
                        .extend(result.assistant_item.content.parts);
                    self.store.update_item(&existing.id, &existing)?
                }
                None => self
                    .store
                    .append_item(&context.id, &result.assistant_item)?,
            };

            debug!(phase = TurnPhase::ReconcilingTools.as_str(), calls = result.tool_calls.len());
            // Settlement on the persisted item is the dedup check: a call
            // that already settled (e.g. before a step retry) is skipped.
            let pending: Vec<ToolCall> = result
                .tool_calls
                .iter()
                .filter(|call| !toolcalls::call_settled(&reaction_item, call))
                .cloned()
                .collect();

            if !pending.is_empty() {
                stream.write_substate(Some("actions")).await;

                let action_ctx = ActionContext {
                    context_id: context.id.clone(),
                    execution_id: execution.id.clone(),
                    iteration,
                    context_content: context.content.clone(),
                };
                let outcomes = join_all(pending.iter().map(|call| {
                    let action_ctx = &action_ctx;
                    async move { self.actions.execute_call(call, action_ctx).await }
                }))
                .await;

                for (call, outcome) in pending.iter().zip(&outcomes) {
                    reaction_item.content.parts =
                        toolcalls::apply_execution_result(&reaction_item.content.parts, call, outcome);
                }
                reaction_item = self.store.update_item(&reaction_item.id, &reaction_item)?;

                // Outputs are streamed only after the update is durable.
                stream.write_tool_outputs(&reaction_item, &pending).await;
                stream.write_substate(None).await;
            }

            self.store
                .update_execution(&execution.id, ExecutionStatus::Executing, iteration)?;

            debug!(phase = TurnPhase::DecidingContinuation.as_str(), iteration);
            let wants_more = match &params.should_continue {
                Some(predicate) => predicate(iteration, max_model_steps, &reaction_item),
                None => default_should_continue(iteration, max_model_steps, &reaction_item),
            };
            // The budget is the authoritative stop even for caller predicates.
            if !wants_more || iteration + 1 >= max_model_steps {
                return Ok((reaction_item, iteration + 1));
            }
            iteration += 1;
        }
    }

    async fn mirror_turn(
        &self,
        context: &StoredContext,
        trigger: &Item,
        reaction_item: &Item,
        execution_id: &ExecutionId,
    ) -> Result<(), EngineError> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };

        let latest_context = self
            .store
            .get_context(&ContextIdentifier::Id(context.id.clone()))?
            .unwrap_or_else(|| context.clone());
        let mut writes = vec![
            MirrorWrite::ContextUpsert { context: latest_context },
            MirrorWrite::ItemUpsert {
                context_id: context.id.clone(),
                item: trigger.clone(),
            },
            MirrorWrite::ItemUpsert {
                context_id: context.id.clone(),
                item: reaction_item.clone(),
            },
        ];
        if let Some(execution) = self.store.get_execution(execution_id)? {
            writes.push(MirrorWrite::ExecutionUpsert { execution });
        }

        mirror.mirror(&self.env, &writes).await?;
        Ok(())
    }

    /// Best-effort failure bookkeeping; the original error always wins.
    async fn fail_turn(
        &self,
        execution_id: &ExecutionId,
        stream: &ThreadStream,
        err: EngineError,
    ) -> EngineError {
        if let Err(mark) = self
            .store
            .update_execution(execution_id, ExecutionStatus::Failed, 0)
        {
            warn!(execution_id = %execution_id, error = %mark, "could not mark execution failed");
        }
        stream.finalize(false, false).await;
        err
    }

    fn resolve_context(&self, params: &ReactParams) -> Result<StoredContext, EngineError> {
        match &params.identifier {
            Some(identifier) => {
                if let Some(context) = self.store.get_context(identifier)? {
                    return Ok(context);
                }
                if params.create_if_missing {
                    match self
                        .store
                        .create_context(Some(identifier), params.initial_content.clone())
                    {
                        Ok(context) => Ok(context),
                        // Lost a first-trigger race; the winner's row is
                        // the context.
                        Err(StoreError::Conflict(_)) => {
                            self.store.get_context(identifier)?.ok_or_else(|| {
                                EngineError::ContextResolution(format!(
                                    "context for {identifier:?} vanished after a create conflict"
                                ))
                            })
                        }
                        Err(e) => Err(e.into()),
                    }
                } else {
                    Err(EngineError::ContextResolution(format!(
                        "no context matches {identifier:?} and creation is not permitted"
                    )))
                }
            }
            None => Ok(self
                .store
                .create_context(None, params.initial_content.clone())?),
        }
    }

    fn context_lock(&self, context_id: &ContextId) -> Arc<Mutex<()>> {
        self.context_locks
            .entry(context_id.as_str().to_owned())
            .or_default()
            .clone()
    }

    /// Drop the map entry once no turn holds or awaits this context's
    /// lock; the map stays bounded by the number of in-flight turns.
    fn prune_context_lock(&self, context_id: &ContextId) {
        self.context_locks
            .remove_if(context_id.as_str(), |_, lock| Arc::strong_count(lock) == 1);
    }
}
