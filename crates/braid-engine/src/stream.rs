use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use braid_core::chunks::StreamChunk;
use braid_core::ids::ContextId;
use braid_core::items::{Item, Part, ToolCallState};
use braid_core::toolcalls::ToolCall;

/// Writer side of the live output channel for one turn.
///
/// Cloneable; absence of a channel ([`ThreadStream::disabled`]) is legal and
/// turns every operation into a no-op, which is how silent turns run. The
/// lock is held for exactly one send — never across any other await — so
/// chunks go out in the order the engine issues them. A dropped receiver
/// logs a warning and discards the chunk; losing a live client never fails
/// the turn.
#[derive(Clone)]
pub struct ThreadStream {
    inner: Option<Arc<Mutex<Option<mpsc::Sender<StreamChunk>>>>>,
}

impl ThreadStream {
    pub fn new(sender: mpsc::Sender<StreamChunk>) -> Self {
        Self { inner: Some(Arc::new(Mutex::new(Some(sender)))) }
    }

    /// A bounded channel plus the stream over its sender.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// A stream with no channel; every operation is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    async fn write(&self, chunk: StreamChunk) {
        let Some(inner) = &self.inner else { return };
        let guard = inner.lock().await;
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(chunk).await.is_err() {
                    warn!("stream receiver dropped — chunk discarded");
                }
            }
            None => warn!("stream already closed — chunk discarded"),
        }
    }

    /// Non-transient: clients persist the context id for reconnect.
    pub async fn write_context_id(&self, context_id: &ContextId) {
        self.write(StreamChunk::context_id(context_id.clone())).await;
    }

    /// Write (`Some`) or clear (`None`) the ephemeral sub-state label.
    pub async fn write_substate(&self, key: Option<&str>) {
        self.write(StreamChunk::substate(key)).await;
    }

    pub async fn write_ping(&self, label: &str) {
        self.write(StreamChunk::ping(label)).await;
    }

    /// One chunk per settled call on `item`, in call order. Calls whose
    /// part is still pending (or absent) produce nothing.
    pub async fn write_tool_outputs(&self, item: &Item, calls: &[ToolCall]) {
        for call in calls {
            let settled = item.content.parts.iter().find_map(|p| match p {
                Part::ToolCall { tool_name, tool_call_id, state, .. }
                    if *tool_name == call.tool_name && *tool_call_id == call.tool_call_id =>
                {
                    Some(state.clone())
                }
                _ => None,
            });

            match settled {
                Some(ToolCallState::OutputAvailable { output }) => {
                    self.write(StreamChunk::ToolOutputAvailable {
                        tool_call_id: call.tool_call_id.clone(),
                        output,
                    })
                    .await;
                }
                Some(ToolCallState::OutputError { error_text }) => {
                    self.write(StreamChunk::ToolOutputError {
                        tool_call_id: call.tool_call_id.clone(),
                        error_text,
                    })
                    .await;
                }
                Some(ToolCallState::Pending) | None => {}
            }
        }
    }

    /// Optionally emit the terminal `finish` marker, then close the channel
    /// unless told to keep it open (several engine iterations may share one
    /// physical stream).
    pub async fn finalize(&self, send_finish: bool, keep_open: bool) {
        let Some(inner) = &self.inner else { return };

        if send_finish {
            self.write(StreamChunk::Finish).await;
        }

        if !keep_open {
            let mut guard = inner.lock().await;
            // Dropping the sender closes the receiver side.
            guard.take();
        }
    }
}
