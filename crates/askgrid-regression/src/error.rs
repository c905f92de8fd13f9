//! Training and prediction error types.

use thiserror::Error;

/// Errors raised by model training and the order classifier.
///
/// All of these abort only the classifier-backed optimization method; the
/// epoch falls back to whatever other method succeeds.
#[derive(Debug, Error, PartialEq)]
pub enum TrainingError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("training set rows must match the expectation vector length")]
    DimensionMismatch,

    #[error("all elements in the vector are the same")]
    DegenerateVector,

    #[error("reached max number of iterations: {0}")]
    MaxIterations(usize),

    #[error("model produced non-finite coefficients")]
    NonFinite,

    #[error("input vector length {actual} does not match the trained model ({expected})")]
    InputLength { expected: usize, actual: usize },

    #[error("number of benchmarks has changed since training: {0}")]
    BenchmarkCountChanged(usize),
}
