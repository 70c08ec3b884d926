//! Error type for the subsampling and sampled-softmax cores.

use thiserror::Error;

/// Domain errors. These are all configuration or input mistakes; none of them
/// is transient, so callers should fail the step rather than retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Subsampling threshold outside the open interval (0, 1).
    #[error("subsampling threshold must be in (0, 1), got {0}")]
    InvalidThreshold(f64),

    /// The frequency table has no entries.
    #[error("frequency table is empty")]
    EmptyFrequencyTable,

    /// Every entry of the frequency table is zero.
    #[error("total frequency is zero")]
    ZeroTotalFrequency,

    /// A dataset with no documents.
    #[error("dataset contains no documents")]
    EmptyCorpus,

    /// Subsampling batch size of zero.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// A token id is not covered by the frequency table or vocabulary.
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    /// Sample count must be strictly less than the vocabulary size.
    #[error("sample count {num_samples} must be less than vocabulary size {vocab_size}")]
    TooManySamples { num_samples: usize, vocab_size: usize },

    /// Sample count of zero.
    #[error("sample count must be at least 1")]
    NoSamples,

    /// A noise weight is zero, negative, or not finite.
    #[error("noise weight for id {id} must be positive and finite, got {weight}")]
    InvalidNoiseWeight { id: usize, weight: f64 },

    /// Smoothing exponent is negative or not finite.
    #[error("smoothing exponent must be finite and non-negative, got {0}")]
    InvalidSmoothing(f64),

    /// Noise distribution length differs from the projection's vocabulary size.
    #[error("noise distribution covers {noise} ids but vocabulary has {vocab_size}")]
    NoiseSizeMismatch { noise: usize, vocab_size: usize },

    /// Vector length differs from the projection's hidden dimension.
    #[error("expected vector of length {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A hidden vector or a computed score is NaN or infinite.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    /// True label outside `0..vocab_size`.
    #[error("label {label} out of range for vocabulary of size {vocab_size}")]
    LabelOutOfRange { label: usize, vocab_size: usize },

    /// The same word appears twice in a vocabulary.
    #[error("duplicate word in vocabulary: {0:?}")]
    DuplicateWord(String),

    /// A training option is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
