//! Prices and price-swing thresholds.
//!
//! All marketplace prices are expressed per second in atto-USD (1e-18 USD),
//! stored as unsigned 128-bit integers so that sums over plan sets never
//! lose precision.

use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const ATTO_PER_USD: f64 = 1e18;

/// A per-second price in atto-USD.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Price(pub u128);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Lossy conversion to USD per second, for ranking and logging.
    pub fn as_usd_per_second(&self) -> f64 {
        self.0 as f64 / ATTO_PER_USD
    }

    pub fn from_usd_per_second(usd: f64) -> Self {
        Price((usd * ATTO_PER_USD).max(0.0).round() as u128)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Price>>(iter: I) -> Self {
        Price(iter.map(|p| p.0).sum())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.12} USD/s", self.as_usd_per_second())
    }
}

impl FromStr for Price {
    type Err = CoreError;

    /// Parses `"N USD/s"` or `"N USD/h"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (value, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(value), Some(unit), None) => (value, unit),
            _ => {
                return Err(CoreError::InvalidPrice(format!(
                    "expected `N USD/s` or `N USD/h`, got `{s}`"
                )));
            }
        };

        let value: f64 = value
            .parse()
            .map_err(|_| CoreError::InvalidPrice(format!("`{value}` is not a number")))?;
        if value < 0.0 {
            return Err(CoreError::InvalidPrice("price must be non-negative".into()));
        }

        let per_second = match unit {
            "USD/s" => value,
            "USD/h" => value / 3600.0,
            other => {
                return Err(CoreError::InvalidPrice(format!(
                    "unknown price unit `{other}`"
                )));
            }
        };

        Ok(Price::from_usd_per_second(per_second))
    }
}

/// Answers "does price A exceed price B by more than this threshold".
///
/// Either a relative (percentage) or an absolute (currency per second) rule;
/// parsed from `"N%"`, `"N USD/s"` or `"N USD/h"` at configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PriceThreshold {
    /// Percentage threshold, stored scaled by 1000 (1% == 1000).
    Relative(i128),
    /// Flat per-second difference.
    Absolute(Price),
}

impl PriceThreshold {
    pub fn relative(percent: f64) -> Result<Self, CoreError> {
        if percent <= 0.0 {
            return Err(CoreError::InvalidThreshold(
                "price threshold must be a positive number".into(),
            ));
        }
        Ok(PriceThreshold::Relative((percent * 1000.0) as i128))
    }

    pub fn absolute(price: Price) -> Result<Self, CoreError> {
        if price.is_zero() {
            return Err(CoreError::InvalidThreshold(
                "price threshold must be a positive number".into(),
            ));
        }
        Ok(PriceThreshold::Absolute(price))
    }

    /// Whether `price` exceeds `other` by more than this threshold.
    pub fn exceeds(&self, price: Price, other: Price) -> bool {
        match *self {
            PriceThreshold::Relative(scaled) => {
                if other.is_zero() {
                    return !price.is_zero();
                }
                // Fixed-point per-mille-of-percent arithmetic, no floats.
                let ratio = (price.0 as i128) * 100_000 / (other.0 as i128) - 100_000;
                ratio >= scaled
            }
            PriceThreshold::Absolute(threshold) => {
                let diff = price.0 as i128 - other.0 as i128;
                diff >= threshold.0 as i128
            }
        }
    }
}

impl FromStr for PriceThreshold {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(percent) = value.strip_suffix('%') {
            let percent: f64 = percent.parse().map_err(|_| {
                CoreError::InvalidThreshold(format!("`{percent}` is not a number"))
            })?;
            return PriceThreshold::relative(percent);
        }

        match s.parse::<Price>() {
            Ok(price) => PriceThreshold::absolute(price),
            Err(_) => Err(CoreError::InvalidThreshold(format!(
                "must be either `N USD/s`, `N USD/h` or `N%`, got `{s}`"
            ))),
        }
    }
}

impl TryFrom<String> for PriceThreshold {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PriceThreshold> for String {
    fn from(value: PriceThreshold) -> Self {
        match value {
            PriceThreshold::Relative(scaled) => format!("{}%", scaled as f64 / 1000.0),
            PriceThreshold::Absolute(price) => price.to_string(),
        }
    }
}
