use thiserror::Error;

/// Errors surfaced by the discovery pipeline.
///
/// Per-candidate and per-page failures are recovered locally inside the
/// gather/probe phases and never reach this type; what remains is the set of
/// failures a caller can actually act on.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Bad caller input (e.g. an empty topic set). Raised before any network
    /// activity.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration (weight sum, conflicting options). Raised at
    /// startup, before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Local quota bookkeeping found the window exhausted. Only returned by
    /// the non-blocking `try_acquire` path; the blocking `acquire` waits for
    /// the window to reset instead.
    #[error("quota exhausted for endpoint class {class}: retry in {retry_in_secs}s")]
    QuotaExceeded { class: &'static str, retry_in_secs: u64 },

    /// The external service failed after bounded retries on a call that the
    /// current phase cannot proceed without (e.g. the first page of a gather).
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// A phase exceeded its time budget. The error is recorded on the
    /// mission and the phase cursor is preserved for resumption.
    #[error("phase {phase} timed out after {budget_secs}s ({completed} candidates completed)")]
    Timeout {
        phase: &'static str,
        budget_secs: u64,
        completed: usize,
    },

    /// The mission store could not be written. Fatal: silent loss of a
    /// long-running discovery is unacceptable.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
