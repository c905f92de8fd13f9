//! Device manager error types.

use thiserror::Error;

/// Result type alias for allocation operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors raised while carving resources out of free capacity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The requirement does not fit into what is left. Expected and
    /// recoverable; drives control flow, never logged as a failure.
    #[error("no resources left")]
    Exhausted,
}
