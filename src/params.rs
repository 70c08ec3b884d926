//! Trainable parameters: the input embedding table and the output projection.

use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Glorot/Xavier uniform initialization for a `(rows, cols)` matrix.
pub fn glorot_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (rows + cols).max(1) as f32).sqrt();
    Array::random_using((rows, cols), Uniform::new_inclusive(-limit, limit), rng)
}

/// Clamp every element of `g` to `[-threshold, threshold]`.
pub fn clip_in_place<D: Dimension>(g: &mut Array<f32, D>, threshold: f32) {
    g.mapv_inplace(|x| x.clamp(-threshold, threshold));
}

/// The input layer: one vector per vocabulary word.
#[derive(Debug, Clone)]
pub struct Embeddings {
    table: Array2<f32>,
}

impl Embeddings {
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, dim: usize, rng: &mut R) -> Self {
        Embeddings {
            table: glorot_uniform(vocab_size, dim, rng),
        }
    }

    pub fn from_table(table: Array2<f32>) -> Self {
        Embeddings { table }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.nrows()
    }

    pub fn dim(&self) -> usize {
        self.table.ncols()
    }

    /// The hidden representation for word `id`.
    pub fn lookup(&self, id: usize) -> Result<ArrayView1<'_, f32>> {
        if id >= self.vocab_size() {
            return Err(Error::TokenOutOfRange {
                id,
                vocab_size: self.vocab_size(),
            });
        }
        Ok(self.table.row(id))
    }

    pub fn table(&self) -> ArrayView2<'_, f32> {
        self.table.view()
    }

    /// `table[id] -= rate * clip(grad)`.
    pub fn apply_gradient(&mut self, id: usize, grad: ArrayView1<'_, f32>, rate: f32, clip: f32) {
        let mut g = grad.to_owned();
        clip_in_place(&mut g, clip);
        self.table.row_mut(id).scaled_add(-rate, &g);
    }
}

/// Per-class output weights and biases: `score(c) = w_c . h + b_c`.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Shape `(vocab_size, dim)`.
    weights: Array2<f32>,
    /// Shape `(vocab_size,)`.
    bias: Array1<f32>,
}

/// Gradients of one example's sampled-softmax loss, restricted to the classes
/// that were scored.
#[derive(Debug, Clone)]
pub struct SampledGradients {
    /// Class ids, in the order of the rows of `weights`. May repeat.
    pub classes: Vec<usize>,
    /// ∂L/∂h.
    pub hidden: Array1<f32>,
    /// `weights[j]` is ∂L/∂w for `classes[j]`.
    pub weights: Array2<f32>,
    /// `bias[j]` is ∂L/∂b for `classes[j]`.
    pub bias: Array1<f32>,
}

impl Projection {
    /// Glorot-uniform weights, zero biases.
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, dim: usize, rng: &mut R) -> Self {
        Projection {
            weights: glorot_uniform(vocab_size, dim, rng),
            bias: Array1::zeros(vocab_size),
        }
    }

    pub fn from_parts(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weights.nrows() != bias.len() {
            return Err(Error::DimensionMismatch {
                expected: weights.nrows(),
                actual: bias.len(),
            });
        }
        Ok(Projection { weights, bias })
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn weights(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    pub fn bias(&self) -> ArrayView1<'_, f32> {
        self.bias.view()
    }

    pub(crate) fn check_hidden(&self, h: ArrayView1<'_, f32>) -> Result<()> {
        if h.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                actual: h.len(),
            });
        }
        Ok(())
    }

    /// Uncorrected logits `w_c . h + b_c` for the given classes.
    pub fn scores_for(&self, h: ArrayView1<'_, f32>, classes: &[usize]) -> Result<Array1<f32>> {
        self.check_hidden(h)?;
        let w = self.weights.select(Axis(0), classes);
        let b = self.bias.select(Axis(0), classes);
        Ok(w.dot(&h) + &b)
    }

    /// Logits for the whole vocabulary, `W h + b`.
    pub fn full_scores(&self, h: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        self.check_hidden(h)?;
        Ok(self.weights.dot(&h) + &self.bias)
    }

    /// The class with the highest full-vocabulary logit.
    pub fn predict(&self, h: ArrayView1<'_, f32>) -> Result<usize> {
        let scores = self.full_scores(h)?;
        Ok(scores
            .iter()
            .enumerate()
            .max_by_key(|&(_, &s)| OrderedFloat(s))
            .map(|(i, _)| i)
            .unwrap_or(0))
    }

    /// Apply one example's gradients with learning rate `rate`, clipping each
    /// element to `[-clip, clip]` first.
    pub fn apply_gradients(&mut self, grads: &SampledGradients, rate: f32, clip: f32) {
        for (j, &c) in grads.classes.iter().enumerate() {
            let mut dw = grads.weights.row(j).to_owned();
            clip_in_place(&mut dw, clip);
            self.weights.row_mut(c).scaled_add(-rate, &dw);
            self.bias[c] -= rate * grads.bias[j].clamp(-clip, clip);
        }
    }
}

/// Serializable snapshot of all parameters. Used for checkpoints and for the
/// `--bincode` output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub vocab: Vec<String>,
    pub dim: usize,
    /// Row-major `(vocab.len(), dim)`.
    pub embeddings: Vec<f32>,
    /// Row-major `(vocab.len(), dim)`.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    /// Training examples seen when the snapshot was taken.
    pub samples_seen: u64,
}

impl Model {
    pub fn snapshot(
        vocab: &[String],
        embeddings: &Embeddings,
        projection: &Projection,
        samples_seen: u64,
    ) -> Self {
        Model {
            vocab: vocab.to_vec(),
            dim: embeddings.dim(),
            embeddings: embeddings.table.iter().copied().collect(),
            weights: projection.weights.iter().copied().collect(),
            bias: projection.bias.to_vec(),
            samples_seen,
        }
    }

    /// Rebuild the parameter arrays.
    pub fn into_params(self) -> Result<(Embeddings, Projection)> {
        let n = self.vocab.len();
        // Sizes come from a file; a corrupt one must not overflow.
        let expected = n.checked_mul(self.dim).ok_or(Error::DimensionMismatch {
            expected: usize::MAX,
            actual: self.embeddings.len(),
        })?;
        for actual in [self.embeddings.len(), self.weights.len()] {
            if actual != expected {
                return Err(Error::DimensionMismatch { expected, actual });
            }
        }
        let mismatch = |_: ndarray::ShapeError| Error::DimensionMismatch {
            expected,
            actual: 0,
        };
        let table = Array2::from_shape_vec((n, self.dim), self.embeddings).map_err(mismatch)?;
        let weights = Array2::from_shape_vec((n, self.dim), self.weights).map_err(mismatch)?;
        let projection = Projection::from_parts(weights, Array1::from(self.bias))?;
        Ok((Embeddings::from_table(table), projection))
    }
}
