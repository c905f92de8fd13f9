//! Min-max feature rescaling to the [0, 1] range.

/// Rescales a feature to [0, 1] based on the min/max observed at
/// construction time. A vector whose elements are all equal is
/// *degenerate*: it carries no information and its column must be dropped
/// from training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxNormalizer {
    min: f64,
    max: f64,
    scale: f64,
}

impl MinMaxNormalizer {
    pub fn new(values: &[f64]) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }
        if values.is_empty() {
            min = 0.0;
            max = 0.0;
        }

        Self {
            min,
            max,
            scale: max - min,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.scale == 0.0
    }

    pub fn normalize(&self, x: f64) -> f64 {
        (x - self.min) / self.scale
    }

    pub fn normalize_batch(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = self.normalize(*v);
        }
    }

    pub fn denormalize(&self, x: f64) -> f64 {
        x * self.scale + self.min
    }
}
