use thiserror::Error;

use askgrid_regression::TrainingError;

#[derive(Debug, Error, PartialEq)]
pub enum OptimizeError {
    /// Too few orders to fit a meaningful regression.
    #[error("not enough orders to perform optimization: {actual} < {required}")]
    NotEnoughOrders { actual: usize, required: usize },

    #[error("failed to classify orders: {0}")]
    Training(#[from] TrainingError),

    /// No feasible allocation was found at all.
    #[error("no feasible allocation found")]
    NoSolution,

    /// Every evolved individual stayed unfit for the whole run.
    #[error("failed to evolve a fit individual in {generations} generations")]
    Unevolved { generations: usize },

    /// Every sub-method of a batch run failed.
    #[error("all batch sub-methods failed: {0}")]
    BatchFailed(String),
}

pub type OptimizeResult<T> = Result<T, OptimizeError>;
