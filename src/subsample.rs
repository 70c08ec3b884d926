//! Subsampling of frequent words.
//!
//! Each occurrence of word `w` is discarded with probability
//! `1 - sqrt(t / p(w))`, where `p(w)` is the word's share of the corpus and
//! `t` is the threshold. Words no more frequent than `t` are always kept.

use std::fmt;

use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;

use crate::error::{Error, Result};

/// Number of tokens handled per vectorized step.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Probability of removing one occurrence of a word whose normalized frequency
/// is `p`, given threshold `t`. Always in `0.0..=1.0`, and exactly 0 when
/// `p <= t`.
pub fn removal_probability(p: f64, t: f64) -> f64 {
    if p <= t {
        0.0
    } else {
        (1.0 - (t / p).sqrt()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Subsampler {
    threshold: f64,
    batch_size: usize,
    /// `removal_probs[id]` is the chance that any one occurrence of `id` is dropped.
    removal_probs: Array1<f64>,
}

/// Periodic report emitted while a stream is being subsampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleProgress {
    /// Tokens examined so far.
    pub processed: usize,
    /// Length of the input stream.
    pub total: usize,
    /// Tokens marked for removal so far.
    pub removed: usize,
}

impl fmt::Display for SubsampleProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} ({:.3}%) so far. {} words for removal ({:.1}%).",
            self.processed,
            100.0 * self.processed as f64 / self.total.max(1) as f64,
            self.removed,
            100.0 * self.removed as f64 / self.processed.max(1) as f64,
        )
    }
}

/// Outcome of one subsampling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleSummary {
    /// Input length.
    pub total: usize,
    /// Number of tokens deleted.
    pub removed: usize,
}

impl SubsampleSummary {
    pub fn retained(&self) -> usize {
        self.total - self.removed
    }
}

impl fmt::Display for SubsampleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Removed {} words ({:.2}%), {} remain.",
            self.removed,
            100.0 * self.removed as f64 / self.total.max(1) as f64,
            self.retained(),
        )
    }
}

impl Subsampler {
    /// Build the per-word removal table from raw counts.
    ///
    /// Fails if `threshold` is not in (0, 1) or if the table is empty or sums
    /// to zero.
    pub fn new(freqs: &[u64], threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(Error::InvalidThreshold(threshold));
        }
        if freqs.is_empty() {
            return Err(Error::EmptyFrequencyTable);
        }
        let freqs = freqs.iter().map(|&f| f as f64).collect::<Array1<f64>>();
        let total = freqs.sum();
        if total == 0.0 {
            return Err(Error::ZeroTotalFrequency);
        }

        let removal_probs = (freqs / total).mapv(|p| removal_probability(p, threshold));
        Ok(Subsampler {
            threshold,
            batch_size: DEFAULT_BATCH_SIZE,
            removal_probs,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn vocab_size(&self) -> usize {
        self.removal_probs.len()
    }

    /// Removal probability for word `id`. Panics if `id` is out of range.
    pub fn removal_probability(&self, id: usize) -> f64 {
        self.removal_probs[id]
    }

    /// Subsample `stream` in place using uniform draws from `rng`.
    ///
    /// `on_progress` is called for every batch that starts at or crosses a
    /// multiple of `progress_interval` (never, if the interval is 0).
    pub fn subsample<R, P>(
        &self,
        stream: &mut Vec<usize>,
        rng: &mut R,
        progress_interval: usize,
        on_progress: P,
    ) -> Result<SubsampleSummary>
    where
        R: Rng + ?Sized,
        P: FnMut(&SubsampleProgress),
    {
        self.subsample_with_draws(
            stream,
            |mut draws| draws.mapv_inplace(|_| rng.gen::<f64>()),
            progress_interval,
            on_progress,
        )
    }

    /// Like `subsample`, but the caller supplies the random numbers.
    ///
    /// `fill_draws` receives one view per batch, as long as the batch, and must
    /// fill it with values in `0.0..1.0`. A token is removed when its draw is
    /// below its removal probability.
    pub fn subsample_with_draws<F, P>(
        &self,
        stream: &mut Vec<usize>,
        mut fill_draws: F,
        progress_interval: usize,
        mut on_progress: P,
    ) -> Result<SubsampleSummary>
    where
        F: FnMut(ArrayViewMut1<'_, f64>),
        P: FnMut(&SubsampleProgress),
    {
        let vocab_size = self.vocab_size();
        if let Some(&id) = stream.iter().find(|&&id| id >= vocab_size) {
            return Err(Error::TokenOutOfRange { id, vocab_size });
        }

        let total = stream.len();
        let mut keep: Vec<bool> = Vec::with_capacity(total);
        let mut removed = 0;
        let mut draws = Array1::<f64>::zeros(self.batch_size.min(total));

        // The last chunk may be shorter than `batch_size`; it still gets processed.
        for (i, batch) in stream.chunks(self.batch_size).enumerate() {
            let start = i * self.batch_size;
            let end = start + batch.len();

            let mut batch_draws = draws.slice_mut(s![..batch.len()]);
            fill_draws(batch_draws.view_mut());
            let probs = batch
                .iter()
                .map(|&id| self.removal_probs[id])
                .collect::<Array1<f64>>();
            let remove = Zip::from(&batch_draws)
                .and(&probs)
                .map_collect(|&draw, &r| draw < r);

            removed += remove.iter().filter(|&&r| r).count();
            keep.extend(remove.iter().map(|&r| !r));

            if progress_interval > 0 && start.div_ceil(progress_interval) * progress_interval < end
            {
                on_progress(&SubsampleProgress {
                    processed: end,
                    total,
                    removed,
                });
            }
        }

        let mut keep = keep.into_iter();
        stream.retain(|_| keep.next().unwrap_or(true));
        Ok(SubsampleSummary { total, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scripted(draws: &[f64]) -> impl FnMut(ArrayViewMut1<'_, f64>) + '_ {
        let mut next = 0;
        move |mut out| {
            for d in out.iter_mut() {
                *d = draws[next];
                next += 1;
            }
        }
    }

    #[test]
    fn removal_probability_bounds() {
        for &t in &[1e-5, 1e-3, 0.01, 0.5] {
            for &p in &[0.0, 1e-7, 1e-5, 1e-3, 0.01, 0.3, 0.999, 1.0] {
                let r = removal_probability(p, t);
                assert!((0.0..=1.0).contains(&r), "r({p}, {t}) = {r}");
                if p <= t {
                    assert_eq!(r, 0.0);
                }
            }
        }
    }

    #[test]
    fn skewed_table_scenario() {
        let sub = Subsampler::new(&[100, 1, 1], 0.01).unwrap();
        let r0 = sub.removal_probability(0);
        assert!((r0 - (1.0 - (0.01f64 / (100.0 / 102.0)).sqrt())).abs() < 1e-12);
        assert!((r0 - 0.899).abs() < 1e-3);
        assert_eq!(sub.removal_probability(1), 0.0);
        assert_eq!(sub.removal_probability(2), 0.0);

        let mut stream = vec![0, 0, 0, 1, 2, 0];
        let summary = sub
            .subsample_with_draws(
                &mut stream,
                scripted(&[0.1, 0.5, 0.95, 0.0, 0.0, 0.2]),
                0,
                |_| {},
            )
            .unwrap();
        assert_eq!(stream, vec![0, 1, 2]);
        assert_eq!(summary, SubsampleSummary { total: 6, removed: 3 });
    }

    #[test]
    fn trailing_partial_batch_is_processed() {
        let sub = Subsampler::new(&[100, 1, 1], 0.01)
            .unwrap()
            .with_batch_size(4)
            .unwrap();
        let mut stream = vec![1, 2, 1, 2, 0, 0];
        let mut sizes = vec![];
        let draws = [0.0; 6];
        let mut next = 0;
        sub.subsample_with_draws(
            &mut stream,
            |mut out| {
                sizes.push(out.len());
                for d in out.iter_mut() {
                    *d = draws[next];
                    next += 1;
                }
            },
            0,
            |_| {},
        )
        .unwrap();
        assert_eq!(sizes, vec![4, 2]);
        assert_eq!(stream, vec![1, 2, 1, 2]);
    }

    #[test]
    fn order_is_preserved() {
        let freqs = [50, 40, 3, 2, 1, 1, 1, 1, 1, 1];
        let sub = Subsampler::new(&freqs, 0.05)
            .unwrap()
            .with_batch_size(7)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let original: Vec<usize> = (0..500).map(|i| (i * 7 + i / 3) % freqs.len()).collect();
        let mut stream = original.clone();
        let summary = sub.subsample(&mut stream, &mut rng, 0, |_| {}).unwrap();

        assert_eq!(stream.len(), original.len() - summary.removed);
        // `stream` must be a subsequence of `original`.
        let mut it = original.iter();
        for id in &stream {
            assert!(it.any(|x| x == id), "order changed");
        }
        // Rare words are never dropped.
        for id in 2..freqs.len() {
            let before = original.iter().filter(|&&x| x == id).count();
            let after = stream.iter().filter(|&&x| x == id).count();
            assert_eq!(before, after, "rare word {id} was removed");
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let sub = Subsampler::new(&[90, 5, 5], 0.01).unwrap();
        let original: Vec<usize> = (0..2000).map(|i| i % 3).collect();

        let mut a = original.clone();
        let mut b = original.clone();
        sub.subsample(&mut a, &mut StdRng::seed_from_u64(3), 0, |_| {})
            .unwrap();
        sub.subsample(&mut b, &mut StdRng::seed_from_u64(3), 0, |_| {})
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rerunning_only_removes_more() {
        let sub = Subsampler::new(&[90, 5, 5], 0.01).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let mut stream: Vec<usize> = (0..3000).map(|i| i % 3).collect();
        sub.subsample(&mut stream, &mut rng, 0, |_| {}).unwrap();
        let once = stream.clone();
        let summary = sub.subsample(&mut stream, &mut rng, 0, |_| {}).unwrap();
        assert!(stream.len() <= once.len());
        assert_eq!(stream.len(), once.len() - summary.removed);
        let mut it = once.iter();
        for id in &stream {
            assert!(it.any(|x| x == id));
        }
    }

    #[test]
    fn progress_reports() {
        let sub = Subsampler::new(&[1, 1], 0.9)
            .unwrap()
            .with_batch_size(5)
            .unwrap();
        let mut stream = vec![0; 12];
        let mut reports = vec![];
        sub.subsample(
            &mut stream,
            &mut StdRng::seed_from_u64(0),
            10,
            |p| reports.push(*p),
        )
        .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].processed, 5);
        assert_eq!(reports[1].processed, 12);
        assert_eq!(reports[1].total, 12);
        assert_eq!(reports[1].removed, 0);
        assert_eq!(
            reports[0].to_string(),
            "Processed 5 (41.667%) so far. 0 words for removal (0.0%)."
        );
    }

    #[test]
    fn setup_errors() {
        assert_eq!(
            Subsampler::new(&[1, 2], 0.0).unwrap_err(),
            Error::InvalidThreshold(0.0)
        );
        assert_eq!(
            Subsampler::new(&[1, 2], 1.0).unwrap_err(),
            Error::InvalidThreshold(1.0)
        );
        assert!(Subsampler::new(&[1, 2], f64::NAN).is_err());
        assert_eq!(
            Subsampler::new(&[], 1e-4).unwrap_err(),
            Error::EmptyFrequencyTable
        );
        assert_eq!(
            Subsampler::new(&[0, 0], 1e-4).unwrap_err(),
            Error::ZeroTotalFrequency
        );
        assert_eq!(
            Subsampler::new(&[1], 1e-4)
                .unwrap()
                .with_batch_size(0)
                .unwrap_err(),
            Error::InvalidBatchSize
        );
    }

    #[test]
    fn out_of_range_token_is_rejected() {
        let sub = Subsampler::new(&[3, 1], 1e-4).unwrap();
        let mut stream = vec![0, 1, 2];
        let err = sub
            .subsample(&mut stream, &mut StdRng::seed_from_u64(0), 0, |_| {})
            .unwrap_err();
        assert_eq!(err, Error::TokenOutOfRange { id: 2, vocab_size: 2 });
        assert_eq!(stream, vec![0, 1, 2]);
    }

    #[test]
    fn zero_frequency_words_are_kept() {
        let sub = Subsampler::new(&[10, 0], 0.01).unwrap();
        assert_eq!(sub.removal_probability(1), 0.0);
        assert!(sub.removal_probability(0).is_finite());
    }
}
