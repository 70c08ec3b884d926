//! Minibatch SGD over skip-gram pairs with a sampled-softmax output layer.

use std::fs::File;
use std::io::BufWriter;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::noise::NoiseDistribution;
use crate::params::{Embeddings, Model, Projection};
use crate::sampled_softmax::SampledSoftmax;
use crate::window::SkipGramWindows;

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Embedding vector length.
    pub hidden_dim: usize,
    /// Exponent applied to unigram counts to build the noise distribution.
    pub smoothing: f64,
    /// Noise classes per example.
    pub num_samples: usize,
    /// Whether a sample set may repeat ids.
    pub allow_duplicates: bool,
    /// Learning rate for the first schedule segment, per sample.
    pub learning_rate: f32,
    /// Multiplier applied to the learning rate after each segment.
    pub lr_decay: f32,
    /// Number of decay steps; the last rate is held afterwards.
    pub lr_steps: usize,
    /// Samples per schedule segment. `None` means half the corpus length.
    pub lr_segment: Option<u64>,
    /// Per-sample gradients are truncated to `[-clip, clip]`.
    pub clip: f32,
    pub epochs: usize,
    /// Maximum skip-gram radius.
    pub max_window: usize,
    /// Subsampling threshold `t`.
    pub subsampling: f64,
    /// Tokens per vectorized subsampling step.
    pub subsample_batch: usize,
    /// Report subsampling progress every this many tokens (0 = never).
    pub subsample_progress: usize,
    pub minibatch_size: usize,
    /// Report progress every this many minibatches (0 = never).
    pub progress_every: usize,
    /// Write a checkpoint every this many samples (0 = never).
    pub checkpoint_every: u64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            hidden_dim: 300,
            smoothing: 0.75,
            num_samples: 15,
            allow_duplicates: false,
            learning_rate: 3e-3,
            lr_decay: 0.8,
            lr_steps: 10,
            lr_segment: None,
            clip: 5.0,
            epochs: 10,
            max_window: 2,
            subsampling: 4e-5,
            subsample_batch: crate::subsample::DEFAULT_BATCH_SIZE,
            subsample_progress: 10_000_000,
            minibatch_size: 128,
            progress_every: 200,
            checkpoint_every: 100_000 * 128,
            seed: 1,
        }
    }
}

impl TrainConfig {
    /// Reject settings that can't work, before any data is touched.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.hidden_dim == 0 {
            return bad("hidden dimension must be at least 1");
        }
        if !(self.smoothing.is_finite() && self.smoothing >= 0.0) {
            return Err(Error::InvalidSmoothing(self.smoothing));
        }
        if self.num_samples == 0 {
            return Err(Error::NoSamples);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return bad("learning rate must be positive");
        }
        if !(self.lr_decay.is_finite() && self.lr_decay > 0.0) {
            return bad("learning rate decay must be positive");
        }
        if self.lr_steps == 0 {
            return bad("learning rate schedule needs at least one step");
        }
        if self.lr_segment == Some(0) {
            return bad("learning rate segment must be at least 1 sample");
        }
        if !(self.clip.is_finite() && self.clip > 0.0) {
            return bad("clipping threshold must be positive");
        }
        if self.max_window == 0 {
            return bad("window size must be at least 1");
        }
        if !(self.subsampling > 0.0 && self.subsampling < 1.0) {
            return Err(Error::InvalidThreshold(self.subsampling));
        }
        if self.subsample_batch == 0 {
            return Err(Error::InvalidBatchSize);
        }
        if self.minibatch_size == 0 {
            return bad("minibatch size must be at least 1");
        }
        Ok(())
    }
}

/// Step-wise exponential decay: `initial * decay^i` during segment `i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateSchedule {
    pub initial: f32,
    pub decay: f32,
    pub steps: usize,
    pub segment_len: u64,
}

impl LearningRateSchedule {
    pub fn rate(&self, samples_seen: u64) -> f32 {
        let last = (self.steps as u64).saturating_sub(1);
        let segment = (samples_seen / self.segment_len.max(1)).min(last);
        self.initial * self.decay.powi(segment as i32)
    }
}

/// Loss and error totals over some number of examples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinibatchStats {
    pub examples: usize,
    pub loss_sum: f64,
    pub errors: usize,
}

impl MinibatchStats {
    pub fn mean_loss(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.loss_sum / self.examples as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.errors as f64 / self.examples as f64
        }
    }
}

impl AddAssign for MinibatchStats {
    fn add_assign(&mut self, other: MinibatchStats) {
        self.examples += other.examples;
        self.loss_sum += other.loss_sum;
        self.errors += other.errors;
    }
}

/// Things the training loop reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainEvent {
    /// Averages since the previous report.
    Progress {
        epoch: usize,
        samples_seen: u64,
        learning_rate: f32,
        stats: MinibatchStats,
    },
    EpochEnd {
        epoch: usize,
        stats: MinibatchStats,
    },
    Checkpoint {
        path: PathBuf,
        samples_seen: u64,
    },
}

pub struct Trainer {
    config: TrainConfig,
    vocab: Vec<String>,
    embeddings: Embeddings,
    projection: Projection,
    softmax: SampledSoftmax,
    schedule: LearningRateSchedule,
    samples_seen: u64,
    rng: StdRng,
    checkpoint_path: Option<PathBuf>,
}

impl Trainer {
    /// Set up parameters and the noise distribution for `dataset`. The corpus
    /// should already be subsampled; its length sets the default schedule
    /// segment.
    pub fn new(config: TrainConfig, dataset: &Dataset) -> Result<Self> {
        config.validate()?;
        dataset.validate()?;

        let vocab_size = dataset.vocab_size();
        let noise = NoiseDistribution::from_counts(&dataset.freqs, config.smoothing)?;
        let softmax = SampledSoftmax::new(noise, config.num_samples, config.allow_duplicates)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let embeddings = Embeddings::new(vocab_size, config.hidden_dim, &mut rng);
        let projection = Projection::new(vocab_size, config.hidden_dim, &mut rng);

        let schedule = LearningRateSchedule {
            initial: config.learning_rate,
            decay: config.lr_decay,
            steps: config.lr_steps,
            segment_len: config
                .lr_segment
                .unwrap_or(dataset.corpus().len() as u64 / 2)
                .max(1),
        };

        Ok(Trainer {
            config,
            vocab: dataset.words.clone(),
            embeddings,
            projection,
            softmax,
            schedule,
            samples_seen: 0,
            rng,
            checkpoint_path: None,
        })
    }

    /// Periodic checkpoints go to `path`, overwriting the previous one.
    pub fn with_checkpoints(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &Embeddings {
        &self.embeddings
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn softmax(&self) -> &SampledSoftmax {
        &self.softmax
    }

    pub fn schedule(&self) -> &LearningRateSchedule {
        &self.schedule
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn vocab(&self) -> &[String] {
        &self.vocab
    }

    pub fn model(&self) -> Model {
        Model::snapshot(&self.vocab, &self.embeddings, &self.projection, self.samples_seen)
    }

    /// Average sampled-softmax loss over `pairs` with the current parameters.
    /// Nothing is updated.
    pub fn evaluate(&mut self, pairs: &[(usize, usize)]) -> Result<MinibatchStats> {
        let mut stats = MinibatchStats::default();
        for &(input, label) in pairs {
            let h = self.embeddings.lookup(input)?;
            let out = self
                .softmax
                .forward(&self.projection, h, label, &mut self.rng)?;
            stats += MinibatchStats {
                examples: 1,
                loss_sum: out.loss as f64,
                errors: out.error as usize,
            };
        }
        Ok(stats)
    }

    /// One SGD step on a minibatch of `(input, label)` pairs.
    ///
    /// Forward and backward passes run in parallel against the parameters as
    /// they were at the start of the step; the updates are applied afterwards.
    pub fn train_minibatch(&mut self, batch: &[(usize, usize)]) -> Result<MinibatchStats> {
        let seeds: Vec<u64> = (0..batch.len()).map(|_| self.rng.gen()).collect();

        let softmax = &self.softmax;
        let embeddings = &self.embeddings;
        let projection = &self.projection;
        let results = batch
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(&(input, label), &seed)| -> Result<_> {
                let mut rng = StdRng::seed_from_u64(seed);
                let h = embeddings.lookup(input)?;
                let out = softmax.forward(projection, h, label, &mut rng)?;
                let grads = out.backward(projection, h);
                Ok((input, out.loss, out.error, grads))
            })
            .collect::<Result<Vec<_>>>()?;

        let rate = self.schedule.rate(self.samples_seen);
        let clip = self.config.clip;
        let mut stats = MinibatchStats::default();
        for (input, loss, error, grads) in results {
            self.embeddings
                .apply_gradient(input, grads.hidden.view(), rate, clip);
            self.projection.apply_gradients(&grads, rate, clip);
            stats += MinibatchStats {
                examples: 1,
                loss_sum: loss as f64,
                errors: error as usize,
            };
        }
        self.samples_seen += batch.len() as u64;
        Ok(stats)
    }

    /// Run `config.epochs` passes over `stream`.
    pub fn train<F>(&mut self, stream: &[usize], mut on_event: F) -> anyhow::Result<MinibatchStats>
    where
        F: FnMut(&TrainEvent),
    {
        let mut total = MinibatchStats::default();
        let mut next_checkpoint = self.config.checkpoint_every;
        let mut batch: Vec<(usize, usize)> = Vec::with_capacity(self.config.minibatch_size);

        for epoch in 0..self.config.epochs {
            let mut windows = SkipGramWindows::new(
                stream,
                self.config.max_window,
                StdRng::seed_from_u64(self.rng.gen()),
            )?;
            let mut epoch_stats = MinibatchStats::default();
            let mut since_report = MinibatchStats::default();
            let mut minibatches = 0;

            loop {
                batch.clear();
                batch.extend(windows.by_ref().take(self.config.minibatch_size));
                if batch.is_empty() {
                    break;
                }
                let learning_rate = self.schedule.rate(self.samples_seen);
                let stats = self
                    .train_minibatch(&batch)
                    .with_context(|| format!("training failed in epoch {epoch}"))?;
                epoch_stats += stats;
                since_report += stats;
                minibatches += 1;

                if self.config.progress_every > 0 && minibatches % self.config.progress_every == 0
                {
                    on_event(&TrainEvent::Progress {
                        epoch,
                        samples_seen: self.samples_seen,
                        learning_rate,
                        stats: since_report,
                    });
                    since_report = MinibatchStats::default();
                }

                if next_checkpoint > 0 && self.samples_seen >= next_checkpoint {
                    next_checkpoint += self.config.checkpoint_every;
                    if let Some(path) = self.checkpoint_path.clone() {
                        self.save_checkpoint(&path)?;
                        on_event(&TrainEvent::Checkpoint {
                            path,
                            samples_seen: self.samples_seen,
                        });
                    }
                }
            }

            on_event(&TrainEvent::EpochEnd {
                epoch,
                stats: epoch_stats,
            });
            total += epoch_stats;
        }
        Ok(total)
    }

    pub fn save_checkpoint(&self, path: &Path) -> anyhow::Result<()> {
        let f = BufWriter::new(
            File::create(path).with_context(|| format!("error creating checkpoint {path:?}"))?,
        );
        bincode::serialize_into(f, &self.model())
            .with_context(|| format!("error writing checkpoint {path:?}"))?;
        Ok(())
    }
}
