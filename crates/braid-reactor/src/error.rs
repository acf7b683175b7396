use thiserror::Error;

/// Errors surfaced by a reactor. These propagate out of the current turn so
/// the hosting step runtime can retry it; a reactor never half-commits.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReactorError {
    /// A scripted reactor ran out of steps without `repeat_last`.
    #[error("scripted reactor exhausted: invocation {index} but only {steps} steps configured")]
    ScriptExhausted { index: usize, steps: usize },

    /// The gateway answered with a non-success status.
    #[error("gateway error {status}: {body}")]
    Gateway { status: u16, body: String },

    /// The request never got a usable response.
    #[error("network error: {0}")]
    Network(String),

    /// The gateway answered 2xx but the body was not a valid completion.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}
