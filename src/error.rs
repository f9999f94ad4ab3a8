use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the evaluation engine.
///
/// The rule pipeline itself never fails: every evaluation that reaches a configuration produces a
/// concrete [`EvaluationResult`](crate::EvaluationResult). Errors only come from the boundaries
/// (identity validation and repository I/O).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The repository has no configuration for the requested flag. This usually indicates a
    /// deployment misconfiguration and is never silently defaulted.
    #[error("flag not found: {key}")]
    FlagNotFound {
        /// Key of the missing flag.
        key: String,
    },

    /// A flag with the same identity is already stored.
    #[error("flag already exists: {key}")]
    FlagAlreadyExists {
        /// Key of the conflicting flag.
        key: String,
    },

    /// Malformed scope, identity or context input.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Repository (or another backend) I/O failure.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend call did not complete before its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Return `true` if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::Timeout)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
