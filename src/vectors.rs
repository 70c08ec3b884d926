//! Reading and writing word vectors in the classic word2vec file formats.
//!
//! Both formats start with a header line `<num words> <size>`. Each following
//! record is the word, a space, and then either `size` space-separated decimal
//! numbers (text) or `size` little-endian `f32`s (binary), then a newline.

use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::prelude::*;
use ordered_float::OrderedFloat;

pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`,
    /// normalized to length 1.
    embeddings: Vec<f32>,
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().copied().map(|e| e * e).sum::<f32>().sqrt()
}

/// Scale `v` to unit length. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Write one vector per word, as text.
pub fn write_text<W: Write>(out: W, vocab: &[String], table: ArrayView2<'_, f32>) -> Result<()> {
    write_vectors(out, vocab, table, false)
}

/// Write one vector per word, as raw `f32`s.
pub fn write_binary<W: Write>(out: W, vocab: &[String], table: ArrayView2<'_, f32>) -> Result<()> {
    write_vectors(out, vocab, table, true)
}

fn write_vectors<W: Write>(
    mut fo: W,
    vocab: &[String],
    table: ArrayView2<'_, f32>,
    binary: bool,
) -> Result<()> {
    anyhow::ensure!(
        vocab.len() == table.nrows(),
        "vocabulary has {} words but there are {} vectors",
        vocab.len(),
        table.nrows()
    );
    writeln!(fo, "{} {}", table.nrows(), table.ncols()).context("error writing output file")?;
    for (word, row) in vocab.iter().zip(table.rows()) {
        write!(fo, "{} ", word).context("error writing output file")?;
        if binary {
            let row = row.to_vec();
            fo.write_all(bytemuck::cast_slice::<f32, u8>(&row))
                .context("error writing output file")?;
        } else {
            for f in row {
                write!(fo, "{} ", f).context("error writing output file")?;
            }
        }
        writeln!(fo).context("error writing output file")?;
    }
    fo.flush().context("error writing output file")?;
    Ok(())
}

pub fn save_text(path: &Path, vocab: &[String], table: ArrayView2<'_, f32>) -> Result<()> {
    let fo = BufWriter::new(File::create(path).context("error creating output file")?);
    write_text(fo, vocab, table)
}

pub fn save_binary(path: &Path, vocab: &[String], table: ArrayView2<'_, f32>) -> Result<()> {
    let fo = BufWriter::new(File::create(path).context("error creating output file")?);
    write_binary(fo, vocab, table)
}

impl Index<usize> for Vectors {
    type Output = [f32];

    fn index(&self, i: usize) -> &[f32] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl Vectors {
    /// Load vectors in the binary format.
    pub fn load(file_name: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_name).context("error opening input file")?);
        Self::read_binary(f)
    }

    pub fn read_binary<R: BufRead>(mut f: R) -> Result<Self> {
        let mut line = String::new();
        f.read_line(&mut line).context("error reading input file")?;
        let mut fields = line.split_whitespace();
        let num_words: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;
        let size: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;

        let mut vocab: Vec<String> = vec![];
        let mut m = vec![0.0; num_words * size];
        for b in 0..num_words {
            let mut vocab_word = Vec::<u8>::new();
            let count = f
                .read_until(b' ', &mut vocab_word)
                .context("error reading input file")?;
            if count == 0 {
                break;
            }
            if vocab_word.last() == Some(&b' ') {
                vocab_word.pop();
            }
            vocab_word.retain(|c| *c != b'\n');
            vocab.push(String::from_utf8(vocab_word).context("invalid word in input file")?);

            let row = &mut m[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<f32, u8>(row))
                .context("error reading input file")?;
            normalize(row);
        }
        m.truncate(vocab.len() * size);

        Ok(Vectors {
            size,
            vocab,
            embeddings: m,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    /// The `n` words closest to the normalized sum of the `query` vectors, by
    /// cosine similarity, best first. Query words themselves are excluded.
    pub fn nearest(&self, query: &[usize], n: usize) -> Vec<(&str, f32)> {
        let mut vec = vec![0.0f32; self.size];
        for &i in query {
            for (v, r) in vec.iter_mut().zip(self[i].iter().copied()) {
                *v += r;
            }
        }
        normalize(&mut vec);

        let mut best: Vec<(&str, f32)> = (0..self.num_words())
            .filter(|c| !query.contains(c))
            .map(|c| (self.vocab[c].as_str(), dot(&vec, &self[c])))
            .collect();
        best.sort_by_key(|&(_word, dist)| Reverse(OrderedFloat(dist)));
        best.truncate(n);
        best
    }
}
