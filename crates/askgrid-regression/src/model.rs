//! Regression solvers behind the `Model`/`TrainedModel` capability pair.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrainingError;

/// A trainable regression model. `training_set` is an MxN matrix,
/// `expectation` an M-length vector; both are expected to be normalized.
pub trait Model: Send + Sync {
    fn train(
        &self,
        training_set: &[Vec<f64>],
        expectation: &[f64],
    ) -> Result<Box<dyn TrainedModel>, TrainingError>;
}

/// The predict half of a trained model.
pub trait TrainedModel: Send + Sync {
    fn predict(&self, vec: &[f64]) -> Result<f64, TrainingError>;
}

/// Solver selection, resolved at configuration load. Unknown tags are
/// rejected by deserialization with a descriptive error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    Lls {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_regularization")]
        regularization: f64,
        #[serde(default = "default_lls_iterations")]
        max_iterations: usize,
    },
    Nnls,
}

fn default_alpha() -> f64 {
    1e-3
}

fn default_regularization() -> f64 {
    6.0
}

fn default_lls_iterations() -> usize {
    1000
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Lls {
            alpha: default_alpha(),
            regularization: default_regularization(),
            max_iterations: default_lls_iterations(),
        }
    }
}

impl ModelConfig {
    pub fn build(&self) -> Box<dyn Model> {
        match *self {
            ModelConfig::Lls {
                alpha,
                regularization,
                max_iterations,
            } => Box::new(LlsModel {
                alpha,
                regularization,
                max_iterations,
            }),
            ModelConfig::Nnls => Box::new(ScaKktModel::default()),
        }
    }
}

/// Linear least squares fitted by batch gradient descent with L2
/// regularization on everything but the intercept.
#[derive(Debug, Clone)]
pub struct LlsModel {
    pub alpha: f64,
    pub regularization: f64,
    pub max_iterations: usize,
}

impl Default for LlsModel {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            regularization: default_regularization(),
            max_iterations: default_lls_iterations(),
        }
    }
}

impl Model for LlsModel {
    fn train(
        &self,
        training_set: &[Vec<f64>],
        expectation: &[f64],
    ) -> Result<Box<dyn TrainedModel>, TrainingError> {
        if training_set.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if training_set.len() != expectation.len() {
            return Err(TrainingError::DimensionMismatch);
        }

        let m = training_set.len();
        let n = training_set[0].len();
        // theta[0] is the intercept.
        let mut theta = vec![0.0f64; n + 1];

        for _ in 0..self.max_iterations {
            let mut gradient = vec![0.0f64; n + 1];
            for (row, &y) in training_set.iter().zip(expectation) {
                let h = theta[0]
                    + row
                        .iter()
                        .zip(&theta[1..])
                        .map(|(x, t)| x * t)
                        .sum::<f64>();
                let residual = h - y;
                gradient[0] += residual;
                for (g, x) in gradient[1..].iter_mut().zip(row) {
                    *g += residual * x;
                }
            }

            theta[0] -= self.alpha / m as f64 * gradient[0];
            for (t, g) in theta[1..].iter_mut().zip(&gradient[1..]) {
                *t = *t * (1.0 - self.alpha * self.regularization / m as f64)
                    - self.alpha / m as f64 * g;
            }
        }

        if theta.iter().any(|t| !t.is_finite()) {
            return Err(TrainingError::NonFinite);
        }

        Ok(Box::new(TrainedLlsModel { theta }))
    }
}

struct TrainedLlsModel {
    theta: Vec<f64>,
}

impl TrainedModel for TrainedLlsModel {
    fn predict(&self, vec: &[f64]) -> Result<f64, TrainingError> {
        if vec.len() + 1 != self.theta.len() {
            return Err(TrainingError::InputLength {
                expected: self.theta.len() - 1,
                actual: vec.len(),
            });
        }

        Ok(self.theta[0]
            + vec
                .iter()
                .zip(&self.theta[1..])
                .map(|(x, t)| x * t)
                .sum::<f64>())
    }
}

/// Non-negative least squares solved by sequential coordinate-wise descent
/// with the ε-KKT stationarity stop criterion.
///
/// See Franc, Hlaváč, Navara: "Sequential Coordinate-wise Algorithm for the
/// Non-negative Least Squares Problem" (CAIP 2005).
#[derive(Debug, Clone)]
pub struct ScaKktModel {
    pub eps: f64,
    pub max_iterations: usize,
}

impl Default for ScaKktModel {
    fn default() -> Self {
        Self {
            eps: 1e-9,
            max_iterations: 10_000_000,
        }
    }
}

impl Model for ScaKktModel {
    fn train(
        &self,
        training_set: &[Vec<f64>],
        expectation: &[f64],
    ) -> Result<Box<dyn TrainedModel>, TrainingError> {
        if training_set.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if training_set.len() != expectation.len() {
            return Err(TrainingError::DimensionMismatch);
        }

        debug!(
            rows = training_set.len(),
            cols = training_set[0].len(),
            "training NNLS model"
        );

        let (a, iterations) = sca_kkt(training_set, expectation, self.eps, self.max_iterations)?;
        if a.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::NonFinite);
        }

        debug!(iterations, "NNLS training complete");

        Ok(Box::new(TrainedScaKktModel { a }))
    }
}

struct TrainedScaKktModel {
    a: Vec<f64>,
}

impl TrainedModel for TrainedScaKktModel {
    fn predict(&self, vec: &[f64]) -> Result<f64, TrainingError> {
        if vec.len() != self.a.len() {
            return Err(TrainingError::InputLength {
                expected: self.a.len(),
                actual: vec.len(),
            });
        }

        Ok(vec.iter().zip(&self.a).map(|(x, a)| x * a).sum())
    }
}

/// Solves `min ||Ax - b||² s.t. x ≥ 0`.
///
/// Returns the fitted coefficients (same length as the rows of `a`) and the
/// number of iterations performed. Hitting the iteration cap without
/// satisfying the ε-KKT criterion is a hard failure.
fn sca_kkt(
    a: &[Vec<f64>],
    b: &[f64],
    eps: f64,
    max_iterations: usize,
) -> Result<(Vec<f64>, usize), TrainingError> {
    let n = a[0].len();

    let (hessian, diagonal) = hessian(a);

    let mut x = vec![0.0f64; n];
    // mu is the gradient of the objective: H·x - Aᵀb, maintained
    // incrementally.
    let mut mu: Vec<f64> = (0..n)
        .map(|j| -b.iter().zip(a).map(|(bi, row)| bi * row[j]).sum::<f64>())
        .collect();

    for iteration in 1..=max_iterations {
        let mut changed = false;
        for k in 0..n {
            if diagonal[k] == 0.0 {
                continue;
            }
            let next = (x[k] - mu[k] / diagonal[k]).max(0.0);
            if next == x[k] {
                continue;
            }

            let delta = next - x[k];
            x[k] = next;
            changed = true;

            for (m, h) in mu.iter_mut().zip(&hessian[k]) {
                *m += delta * h;
            }
        }

        // Stationary point: no coordinate moved, nothing left to do.
        if !changed {
            return Ok((x, iteration));
        }

        // ε-KKT: every coefficient is either at the boundary with a
        // non-descending gradient, or strictly positive with a vanishing
        // gradient.
        let converged = x.iter().zip(&mu).all(|(&xk, &mk)| {
            if xk == 0.0 {
                mk >= -eps
            } else {
                mk.abs() <= eps
            }
        });
        if converged {
            return Ok((x, iteration));
        }
    }

    Err(TrainingError::MaxIterations(max_iterations))
}

/// The Hessian H = AᵀA plus a copy of its diagonal.
fn hessian(a: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = a[0].len();
    let mut h = vec![vec![0.0f64; n]; n];
    let mut diagonal = vec![0.0f64; n];

    for i in 0..n {
        for j in i..n {
            let s: f64 = a.iter().map(|row| row[i] * row[j]).sum();
            h[i][j] = s;
            h[j][i] = s;
        }
        diagonal[i] = h[i][i];
    }

    (h, diagonal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_rows(weights: &[f64], rows: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let n = weights.len();
        let mut training = Vec::with_capacity(rows);
        let mut expectation = Vec::with_capacity(rows);
        for i in 0..rows {
            let row: Vec<f64> = (0..n).map(|j| ((i * 7 + j * 3) % 13) as f64 / 13.0).collect();
            let y: f64 = row.iter().zip(weights).map(|(x, w)| x * w).sum();
            training.push(row);
            expectation.push(y);
        }
        (training, expectation)
    }

    #[test]
    fn nnls_recovers_non_negative_weights() {
        let (training, expectation) = linear_rows(&[2.0, 0.5, 1.0], 40);
        let model = ScaKktModel::default();
        let trained = model.train(&training, &expectation).unwrap();

        for (row, &y) in training.iter().zip(&expectation) {
            let prediction = trained.predict(row).unwrap();
            assert!(
                (prediction - y).abs() < 1e-6,
                "predicted {prediction}, expected {y}"
            );
        }
    }

    #[test]
    fn nnls_clamps_negative_coefficients_to_zero() {
        // y = -x: the best non-negative fit is the zero function.
        let training: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 / 10.0]).collect();
        let expectation: Vec<f64> = training.iter().map(|row| -row[0]).collect();

        let trained = ScaKktModel::default().train(&training, &expectation).unwrap();
        let prediction = trained.predict(&[0.5]).unwrap();
        assert_eq!(prediction, 0.0);
    }

    #[test]
    fn nnls_iteration_cap_is_a_hard_failure() {
        let (training, expectation) = linear_rows(&[2.0, 0.5, 1.0], 40);
        let model = ScaKktModel {
            eps: 0.0,
            max_iterations: 1,
        };
        assert_eq!(
            model.train(&training, &expectation).err(),
            Some(TrainingError::MaxIterations(1))
        );
    }

    #[test]
    fn lls_fits_linear_data() {
        let (training, expectation) = linear_rows(&[1.0, 0.25], 50);
        let model = LlsModel {
            alpha: 0.1,
            regularization: 0.0,
            max_iterations: 20_000,
        };
        let trained = model.train(&training, &expectation).unwrap();

        for (row, &y) in training.iter().zip(&expectation) {
            let prediction = trained.predict(row).unwrap();
            assert!(
                (prediction - y).abs() < 1e-2,
                "predicted {prediction}, expected {y}"
            );
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let model = LlsModel::default();
        assert_eq!(
            model.train(&[vec![1.0]], &[1.0, 2.0]).err(),
            Some(TrainingError::DimensionMismatch)
        );
        assert_eq!(
            model.train(&[], &[]).err(),
            Some(TrainingError::EmptyTrainingSet)
        );
    }

    #[test]
    fn trained_models_check_input_length() {
        let (training, expectation) = linear_rows(&[1.0, 1.0], 10);
        let trained = ScaKktModel::default().train(&training, &expectation).unwrap();
        assert!(matches!(
            trained.predict(&[1.0]).err(),
            Some(TrainingError::InputLength { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn model_config_rejects_unknown_tags() {
        let err = serde_json::from_str::<ModelConfig>(r#"{"type": "forest"}"#);
        assert!(err.is_err());

        let lls: ModelConfig = serde_json::from_str(r#"{"type": "lls"}"#).unwrap();
        assert!(matches!(lls, ModelConfig::Lls { max_iterations: 1000, .. }));
    }
}
