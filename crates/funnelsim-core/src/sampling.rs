//! Weighted categorical sampling

use rand::Rng;
use std::fmt::Debug;

use crate::error::{ConfigError, ConfigResult};

/// Categorical distribution normalized once into a cumulative table.
///
/// Categories with zero weight are dropped, so they can never be sampled.
/// Sampling takes exactly one uniform draw from the caller's RNG.
#[derive(Debug, Clone)]
pub struct WeightedChoice<T> {
    items: Vec<T>,
    cumulative: Vec<f64>,
}

impl<T: Copy + PartialEq + Debug> WeightedChoice<T> {
    /// Build a distribution from `(category, weight)` pairs.
    ///
    /// `label` names the distribution in error messages.
    pub fn new<I>(label: &str, weights: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (T, f64)>,
    {
        let mut items = Vec::new();
        let mut raw = Vec::new();

        for (item, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    field: format!("{}.{:?}", label, item),
                    value: weight,
                });
            }
            if weight > 0.0 {
                items.push(item);
                raw.push(weight);
            }
        }

        let total: f64 = raw.iter().sum();
        if items.is_empty() || total <= 0.0 {
            return Err(ConfigError::EmptyDistribution(label.to_string()));
        }

        let mut running = 0.0;
        let mut cumulative: Vec<f64> = raw
            .iter()
            .map(|w| {
                running += w / total;
                running
            })
            .collect();
        // Float error must not leave a gap at the top of the unit interval
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }

        Ok(Self { items, cumulative })
    }

    /// Draw one category
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        let u: f64 = rng.gen();
        let idx = self.cumulative.partition_point(|&c| c <= u);
        self.items[idx.min(self.items.len() - 1)]
    }

    /// Normalized probability of a category (0 for unknown or zero-weight ones)
    pub fn probability(&self, item: T) -> f64 {
        self.items
            .iter()
            .position(|i| *i == item)
            .map(|idx| {
                let lower = if idx == 0 { 0.0 } else { self.cumulative[idx - 1] };
                self.cumulative[idx] - lower
            })
            .unwrap_or(0.0)
    }

    /// Categories with a positive weight, in insertion order
    pub fn categories(&self) -> &[T] {
        &self.items
    }
}
