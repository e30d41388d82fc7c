use thiserror::Error;

/// Errors surfaced by the scoring engine.
///
/// Every variant except `Validation` is scoped to a single signal: one
/// signal failing never aborts or corrupts its siblings or the running
/// total. Nothing is retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any network activity starts.
    #[error("invalid identity: {0}")]
    Validation(String),

    /// Transport failure or non-success HTTP status.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Malformed or non-terminating continuation chain.
    #[error("pagination protocol violation: {0}")]
    Protocol(String),

    /// A payload did not have the shape the signal's reduction expects.
    #[error("bad payload for {metric}: {detail}")]
    Reduce {
        metric: &'static str,
        detail: String,
    },
}
