//! Core error types.

use thiserror::Error;

/// Errors raised by resource arithmetic and model validation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("insufficient {device}: requested {requested}, only {available} available")]
    Underflow {
        device: &'static str,
        requested: u64,
        available: u64,
    },

    #[error("GPU {0} is not part of this allocation")]
    UnknownGpu(String),

    #[error("incoming network is not allocated")]
    IncomingNotAllocated,

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid price threshold: {0}")]
    InvalidThreshold(String),
}
