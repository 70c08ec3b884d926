//! Skip-gram word embeddings trained with frequency subsampling and a
//! sampled-softmax output layer.

pub mod dataset;
pub mod error;
pub mod noise;
pub mod params;
pub mod sampled_softmax;
pub mod subsample;
pub mod train;
pub mod vectors;
pub mod vocab;
pub mod window;

pub use dataset::Dataset;
pub use error::{Error, Result};
pub use noise::NoiseDistribution;
pub use params::{Embeddings, Model, Projection, SampledGradients};
pub use sampled_softmax::{SampledOutput, SampledSoftmax};
pub use subsample::{SubsampleProgress, SubsampleSummary, Subsampler};
pub use train::{LearningRateSchedule, MinibatchStats, TrainConfig, TrainEvent, Trainer};
pub use vectors::Vectors;
pub use vocab::Vocabulary;
pub use window::SkipGramWindows;
