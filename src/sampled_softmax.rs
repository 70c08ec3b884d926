//! Sampled softmax: cross-entropy over a large vocabulary, estimated from a
//! handful of noise classes.
//!
//! For true label `y` and noise ids `s_1..s_m` drawn from `q`, each scored
//! class gets the logit
//!
//! ```text
//! score(c) = w_c . h + b_c - ln(k * q(c))
//! ```
//!
//! where `k` is the configured sample count. The subtracted term corrects for
//! drawing frequent words more often than rare ones. The loss is the
//! cross-entropy of a softmax over `[score(y), score(s_1), ..., score(s_m)]`
//! with the true label at position 0.

use ndarray::prelude::*;
use rand::Rng;

use crate::error::{Error, Result};
use crate::noise::NoiseDistribution;
use crate::params::{Projection, SampledGradients};

#[derive(Debug, Clone)]
pub struct SampledSoftmax {
    noise: NoiseDistribution,
    num_samples: usize,
    allow_duplicates: bool,
    /// `ln(k * q(c))` for every class `c`.
    log_inclusion: Array1<f32>,
}

/// Result of scoring one example.
#[derive(Debug, Clone)]
pub struct SampledOutput {
    /// Scored classes. `classes[0]` is the true label and it appears nowhere
    /// else.
    pub classes: Vec<usize>,
    /// Corrected logits, parallel to `classes`.
    pub scores: Array1<f32>,
    /// Softmax of `scores`.
    pub probs: Array1<f32>,
    /// `-ln(probs[0])`.
    pub loss: f32,
    /// True if some noise class scored strictly higher than the true label.
    pub error: bool,
}

impl SampledSoftmax {
    /// Fails if `num_samples` is 0 or not less than the vocabulary size.
    pub fn new(noise: NoiseDistribution, num_samples: usize, allow_duplicates: bool) -> Result<Self> {
        if num_samples == 0 {
            return Err(Error::NoSamples);
        }
        if num_samples >= noise.len() {
            return Err(Error::TooManySamples {
                num_samples,
                vocab_size: noise.len(),
            });
        }
        let k = num_samples as f64;
        let log_inclusion = noise.probs().mapv(|q| (k * q).ln() as f32);
        Ok(SampledSoftmax {
            noise,
            num_samples,
            allow_duplicates,
            log_inclusion,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn allow_duplicates(&self) -> bool {
        self.allow_duplicates
    }

    pub fn noise(&self) -> &NoiseDistribution {
        &self.noise
    }

    pub fn vocab_size(&self) -> usize {
        self.noise.len()
    }

    /// Draw the noise classes for one example with true label `label`.
    ///
    /// Without duplicates, the result has exactly `num_samples` distinct ids,
    /// none equal to `label`. With duplicates, `num_samples` independent draws
    /// are taken and any that hit `label` are dropped, so the result may be
    /// shorter and may repeat ids.
    pub fn draw_samples<R: Rng + ?Sized>(&self, label: usize, rng: &mut R) -> Vec<usize> {
        if self.allow_duplicates {
            (0..self.num_samples)
                .map(|_| self.noise.sample(rng))
                .filter(|&c| c != label)
                .collect()
        } else {
            // Terminates: every id has positive mass and num_samples < vocab size.
            let mut samples = Vec::with_capacity(self.num_samples);
            while samples.len() < self.num_samples {
                let c = self.noise.sample(rng);
                if c != label && !samples.contains(&c) {
                    samples.push(c);
                }
            }
            samples
        }
    }

    /// Estimate the loss for hidden vector `h` and true label `label`,
    /// drawing fresh noise classes from `rng`.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        projection: &Projection,
        h: ArrayView1<'_, f32>,
        label: usize,
        rng: &mut R,
    ) -> Result<SampledOutput> {
        self.check_label(label)?;
        let samples = self.draw_samples(label, rng);
        self.forward_with_samples(projection, h, label, &samples)
    }

    /// Estimate the loss against a given sample set. Entries of `samples`
    /// equal to `label` are ignored, so the true label is scored exactly once.
    pub fn forward_with_samples(
        &self,
        projection: &Projection,
        h: ArrayView1<'_, f32>,
        label: usize,
        samples: &[usize],
    ) -> Result<SampledOutput> {
        if projection.vocab_size() != self.vocab_size() {
            return Err(Error::NoiseSizeMismatch {
                noise: self.vocab_size(),
                vocab_size: projection.vocab_size(),
            });
        }
        projection.check_hidden(h)?;
        if !h.iter().all(|x| x.is_finite()) {
            return Err(Error::NonFinite("hidden vector"));
        }
        self.check_label(label)?;
        if let Some(&id) = samples.iter().find(|&&c| c >= self.vocab_size()) {
            return Err(Error::TokenOutOfRange {
                id,
                vocab_size: self.vocab_size(),
            });
        }

        let mut classes = Vec::with_capacity(samples.len() + 1);
        classes.push(label);
        classes.extend(samples.iter().copied().filter(|&c| c != label));

        let scores =
            projection.scores_for(h, &classes)? - &self.log_inclusion.select(Axis(0), &classes);
        // Diverged parameters show up here; f32::max would otherwise swallow a NaN.
        if !scores.iter().all(|s| s.is_finite()) {
            return Err(Error::NonFinite("scores"));
        }

        // Shift by the max so exp() can't overflow.
        let max = scores.fold(f32::NEG_INFINITY, |m, &s| m.max(s));
        let ex = scores.mapv(|s| (s - max).exp());
        let sum_ex = ex.sum();
        let probs = ex / sum_ex;
        let loss = (max + sum_ex.ln() - scores[0]).max(0.0);
        let error = scores.iter().skip(1).any(|&s| s > scores[0]);

        Ok(SampledOutput {
            classes,
            scores,
            probs,
            loss,
            error,
        })
    }

    fn check_label(&self, label: usize) -> Result<()> {
        if label >= self.vocab_size() {
            return Err(Error::LabelOutOfRange {
                label,
                vocab_size: self.vocab_size(),
            });
        }
        Ok(())
    }
}

impl SampledOutput {
    /// Partial derivatives of `self.loss` with respect to `h` and to the
    /// projection rows and biases of the scored classes.
    ///
    /// With `p = softmax(scores)`, ∂loss/∂score[j] is `p[j] - [j == 0]`, and
    /// the correction term is a constant.
    pub fn backward(&self, projection: &Projection, h: ArrayView1<'_, f32>) -> SampledGradients {
        let mut dscore = self.probs.clone();
        dscore[0] -= 1.0;

        let w = projection.weights().select(Axis(0), &self.classes);
        let hidden = w.t().dot(&dscore);
        let weights = &dscore.slice(s![.., NewAxis]) * &h.slice(s![NewAxis, ..]);

        SampledGradients {
            classes: self.classes.clone(),
            hidden,
            weights,
            bias: dscore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn uniform_noise(n: usize) -> NoiseDistribution {
        NoiseDistribution::from_weights(Array1::from_elem(n, 1.0).view()).unwrap()
    }

    #[test]
    fn samples_without_duplicates_skip_label() {
        let ss = SampledSoftmax::new(uniform_noise(5), 2, false).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let s = ss.draw_samples(3, &mut rng);
            assert_eq!(s.len(), 2);
            assert_ne!(s[0], s[1]);
            assert!(s.iter().all(|c| [0, 1, 2, 4].contains(c)), "{s:?}");
        }
    }

    #[test]
    fn samples_with_duplicates_collapse_label() {
        let ss = SampledSoftmax::new(uniform_noise(5), 4, true).unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        let mut saw_short = false;
        let mut saw_repeat = false;
        for _ in 0..500 {
            let s = ss.draw_samples(3, &mut rng);
            assert!(s.len() <= 4);
            assert!(!s.contains(&3));
            saw_short |= s.len() < 4;
            saw_repeat |= (0..s.len()).any(|i| s[i + 1..].contains(&s[i]));
        }
        assert!(saw_short);
        assert!(saw_repeat);
    }

    #[test]
    fn hand_computed_loss() {
        // Two classes per example: label 0 and noise 1. q uniform over 4 ids,
        // k = 2, so every correction is ln(0.5).
        let ss = SampledSoftmax::new(uniform_noise(4), 2, false).unwrap();
        let weights = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0], [0.0, 0.0]];
        let p = Projection::from_parts(weights, Array1::zeros(4)).unwrap();
        let h = array![2.0f32, 1.0];
        let out = ss.forward_with_samples(&p, h.view(), 0, &[1]).unwrap();

        let c = 0.5f32.ln();
        assert_eq!(out.classes, vec![0, 1]);
        assert!((out.scores[0] - (2.0 - c)).abs() < 1e-6);
        assert!((out.scores[1] - (1.0 - c)).abs() < 1e-6);
        let expected = (1.0f32 + (-1.0f32).exp()).ln();
        assert!((out.loss - expected).abs() < 1e-6);
        assert!(!out.error);
        assert!((out.probs.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn label_in_samples_is_scored_once() {
        let ss = SampledSoftmax::new(uniform_noise(6), 3, true).unwrap();
        let p = Projection::new(6, 3, &mut StdRng::seed_from_u64(0));
        let h = array![0.1f32, -0.2, 0.3];
        let out = ss
            .forward_with_samples(&p, h.view(), 2, &[2, 4, 2, 5])
            .unwrap();
        assert_eq!(out.classes, vec![2, 4, 5]);
        assert_eq!(out.classes.iter().filter(|&&c| c == 2).count(), 1);
    }

    #[test]
    fn error_iff_noise_beats_label() {
        let ss = SampledSoftmax::new(uniform_noise(4), 2, false).unwrap();
        let weights = array![[1.0], [3.0], [1.0], [0.0]];
        let p = Projection::from_parts(weights, Array1::zeros(4)).unwrap();
        let h = array![1.0f32];
        assert!(ss.forward_with_samples(&p, h.view(), 0, &[1, 3]).unwrap().error);
        assert!(!ss.forward_with_samples(&p, h.view(), 1, &[0, 3]).unwrap().error);
        // A tie is not an error.
        assert!(!ss.forward_with_samples(&p, h.view(), 0, &[2, 3]).unwrap().error);
    }

    #[test]
    fn loss_is_finite_and_non_negative() {
        let counts: Vec<u64> = (0..50).map(|i| 1 + 1000 / (i + 1)).collect();
        let noise = NoiseDistribution::from_counts(&counts, 0.75).unwrap();
        let ss = SampledSoftmax::new(noise, 15, false).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let p = Projection::new(50, 8, &mut rng);
        for label in 0..50 {
            let h = Array1::from_shape_fn(8, |i| ((label * 8 + i) as f32).sin() * 3.0);
            let out = ss.forward(&p, h.view(), label, &mut rng).unwrap();
            assert!(out.loss.is_finite() && out.loss >= 0.0);
            assert_eq!(out.classes.len(), 16);
            assert_eq!(out.classes[0], label);
        }
    }

    #[test]
    fn setup_and_input_errors() {
        assert_eq!(
            SampledSoftmax::new(uniform_noise(5), 5, false).unwrap_err(),
            Error::TooManySamples {
                num_samples: 5,
                vocab_size: 5
            }
        );
        assert_eq!(
            SampledSoftmax::new(uniform_noise(5), 0, true).unwrap_err(),
            Error::NoSamples
        );

        let ss = SampledSoftmax::new(uniform_noise(5), 2, false).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let p = Projection::new(5, 3, &mut rng);
        assert_eq!(
            ss.forward(&p, array![1.0f32, 2.0].view(), 0, &mut rng)
                .unwrap_err(),
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(
            ss.forward(&p, array![1.0f32, 2.0, 3.0].view(), 5, &mut rng)
                .unwrap_err(),
            Error::LabelOutOfRange {
                label: 5,
                vocab_size: 5
            }
        );
        let small = Projection::new(4, 3, &mut rng);
        assert_eq!(
            ss.forward(&small, array![1.0f32, 2.0, 3.0].view(), 0, &mut rng)
                .unwrap_err(),
            Error::NoiseSizeMismatch {
                noise: 5,
                vocab_size: 4
            }
        );
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        let ss = SampledSoftmax::new(uniform_noise(5), 2, false).unwrap();
        let p = Projection::from_parts(Array2::ones((5, 2)), Array1::zeros(5)).unwrap();
        for h in [array![f32::NAN, 1.0], array![f32::INFINITY, 1.0]] {
            assert_eq!(
                ss.forward_with_samples(&p, h.view(), 0, &[1, 2]).unwrap_err(),
                Error::NonFinite("hidden vector")
            );
        }

        // Finite input, but the parameters have blown up.
        let mut weights = Array2::ones((5, 2));
        weights[[2, 0]] = f32::NAN;
        let diverged = Projection::from_parts(weights, Array1::zeros(5)).unwrap();
        let h = array![1.0f32, 1.0];
        assert_eq!(
            ss.forward_with_samples(&diverged, h.view(), 0, &[1, 2])
                .unwrap_err(),
            Error::NonFinite("scores")
        );
        let overflow = Projection::from_parts(Array2::from_elem((5, 2), f32::MAX), Array1::zeros(5))
            .unwrap();
        assert_eq!(
            ss.forward_with_samples(&overflow, h.view(), 0, &[1, 2])
                .unwrap_err(),
            Error::NonFinite("scores")
        );
        // Classes not scored don't matter.
        assert!(ss.forward_with_samples(&diverged, h.view(), 0, &[1, 3]).is_ok());
    }
}
