//! askgrid-regression — ranking open orders by predicted fair price.
//!
//! The classifier trains a regression model over the currently open buy
//! orders (benchmark vectors → price), predicts a "fair" price for each
//! order, and turns the predicted-minus-actual distance into a weight,
//! decayed by order age. Optimization methods then fill knapsacks in
//! weight-descending order.
//!
//! The solver is swappable behind the `Model`/`TrainedModel` pair:
//!
//! - **`LlsModel`** — batch-gradient-descent linear least squares
//! - **`ScaKktModel`** — closed-form coordinate descent enforcing
//!   non-negative coefficients, stopped by the ε-KKT criterion

pub mod classifier;
pub mod error;
pub mod model;
pub mod normalize;

pub use classifier::{
    Classification, OrderPredictor, RegressionClassifier, SigmoidConfig, WeightedOrder,
    sort_orders,
};
pub use error::TrainingError;
pub use model::{LlsModel, Model, ModelConfig, ScaKktModel, TrainedModel};
pub use normalize::MinMaxNormalizer;
