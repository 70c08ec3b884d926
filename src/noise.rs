//! The noise distribution that sampled softmax draws its negative classes from.

use ndarray::prelude::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Error, Result};

/// Conventional smoothing exponent applied to unigram counts.
pub const DEFAULT_SMOOTHING: f64 = 0.75;

/// A fixed probability distribution over word ids `0..len()`.
///
/// Every id has strictly positive probability, so `ln(q)` is always finite.
/// The distribution is immutable once built and can be shared between
/// threads.
#[derive(Debug, Clone)]
pub struct NoiseDistribution {
    probs: Array1<f64>,
    index: WeightedIndex<f64>,
}

impl NoiseDistribution {
    /// Unigram counts raised to the power `alpha`, normalized.
    ///
    /// Words that never occur get the weight of a single occurrence instead
    /// of zero.
    pub fn from_counts(freqs: &[u64], alpha: f64) -> Result<Self> {
        if !(alpha.is_finite() && alpha >= 0.0) {
            return Err(Error::InvalidSmoothing(alpha));
        }
        let weights = freqs
            .iter()
            .map(|&f| (f.max(1) as f64).powf(alpha))
            .collect::<Array1<f64>>();
        Self::from_weights(weights.view())
    }

    /// Normalize arbitrary weights. Each weight must be positive and finite.
    pub fn from_weights(weights: ArrayView1<'_, f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::EmptyFrequencyTable);
        }
        if let Some((id, &weight)) = weights
            .iter()
            .enumerate()
            .find(|&(_, &w)| !(w.is_finite() && w > 0.0))
        {
            return Err(Error::InvalidNoiseWeight { id, weight });
        }
        let total = weights.sum();
        if !total.is_finite() {
            return Err(Error::InvalidNoiseWeight {
                id: 0,
                weight: total,
            });
        }
        let probs = &weights / total;
        let index = WeightedIndex::new(probs.iter().copied()).map_err(|_| {
            Error::InvalidNoiseWeight {
                id: 0,
                weight: total,
            }
        })?;
        Ok(NoiseDistribution { probs, index })
    }

    /// Number of ids covered.
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// `q(id)`. Panics if `id` is out of range.
    pub fn probability(&self, id: usize) -> f64 {
        self.probs[id]
    }

    pub fn probs(&self) -> ArrayView1<'_, f64> {
        self.probs.view()
    }

    /// Draw one id.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.index.sample(rng)
    }
}
