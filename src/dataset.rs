//! Loading the pre-tokenized training data.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read};
use std::iter;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::vocab::{Vocabulary, END_OF_SENTENCE};

/// Longer words are truncated.
pub const MAX_STRING: usize = 100;

/// Vocabulary, unigram counts, and the corpus as word ids.
///
/// `docs[0]` is the flattened training corpus; that is the stream that gets
/// subsampled and windowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub words: Vec<String>,
    /// `freqs[id]` is the number of occurrences of `words[id]`.
    pub freqs: Vec<u64>,
    pub docs: Vec<Vec<usize>>,
}

// Read words from a file, assuming space + tab + EOL to be word boundaries.
// Each newline yields an END_OF_SENTENCE pseudo-word.
fn read_words<R: Read>(input: R) -> impl Iterator<Item = io::Result<String>> {
    let mut bytes = BufReader::new(input).bytes().peekable();
    iter::from_fn(move || -> Option<io::Result<String>> {
        let mut word = Vec::<u8>::new();
        while let Some(res) = bytes.peek() {
            let ch = match res {
                Ok(ch) => *ch,
                Err(_) => return bytes.next().map(|r| r.map(|_| String::new())),
            };
            if ch == b'\r' {
                bytes.next();
                continue;
            }
            if ch == b' ' || ch == b'\t' || ch == b'\n' {
                if !word.is_empty() {
                    break;
                }
                bytes.next();
                if ch == b'\n' {
                    return Some(Ok(END_OF_SENTENCE.to_string()));
                } else {
                    continue;
                }
            }
            bytes.next();
            if word.len() < MAX_STRING - 1 {
                word.push(ch); // Truncate too long words
            }
        }
        if word.is_empty() {
            None
        } else {
            Some(Ok(String::from_utf8_lossy(&word).to_string()))
        }
    })
}

/// Parse a vocabulary in `word count` lines.
fn read_vocab<R: BufRead>(input: R) -> Result<(Vec<String>, Vec<u64>)> {
    let mut words = vec![];
    let mut freqs = vec![];
    for (line_num, line) in input.lines().enumerate() {
        let line = line.context("error reading vocabulary file")?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        anyhow::ensure!(
            fields.len() == 2,
            "vocabulary file syntax error on line {}",
            line_num + 1
        );
        let count = fields[1].parse::<u64>().with_context(|| {
            format!(
                "error reading vocabulary file: unrecognized frequency number format on line {}",
                line_num + 1
            )
        })?;
        words.push(fields[0].to_string());
        freqs.push(count);
    }
    Ok((words, freqs))
}

impl Dataset {
    pub fn new(words: Vec<String>, freqs: Vec<u64>, docs: Vec<Vec<usize>>) -> Result<Self, Error> {
        let dataset = Dataset { words, freqs, docs };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check that the vocabulary and counts line up and every id is in range.
    pub fn validate(&self) -> Result<(), Error> {
        Vocabulary::new(self.words.clone())?;
        if self.freqs.len() != self.words.len() {
            return Err(Error::DimensionMismatch {
                expected: self.words.len(),
                actual: self.freqs.len(),
            });
        }
        if self.docs.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let vocab_size = self.words.len();
        for doc in &self.docs {
            if let Some(&id) = doc.iter().find(|&&id| id >= vocab_size) {
                return Err(Error::TokenOutOfRange { id, vocab_size });
            }
        }
        Ok(())
    }

    /// Load a dataset previously written by `save`.
    pub fn load(path: &Path) -> Result<Self> {
        let f = BufReader::new(
            File::open(path).with_context(|| format!("failed to open dataset {path:?}"))?,
        );
        let dataset: Dataset = bincode::deserialize_from(f)
            .with_context(|| format!("failed to load dataset from {path:?}"))?;
        dataset
            .validate()
            .with_context(|| format!("invalid dataset in {path:?}"))?;
        Ok(dataset)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = BufWriter::new(
            File::create(path).with_context(|| format!("error creating dataset file {path:?}"))?,
        );
        bincode::serialize_into(f, self).context("error writing dataset file")?;
        Ok(())
    }

    /// Build a dataset from a vocabulary file (`word count` per line) and a
    /// corpus of whitespace-separated words. Corpus words missing from the
    /// vocabulary are skipped.
    pub fn from_text(vocab_file: &Path, corpus_file: &Path) -> Result<Self> {
        let vocab = BufReader::new(
            File::open(vocab_file).context("error opening vocabulary file")?,
        );
        let corpus = File::open(corpus_file).context("error opening training data file")?;
        Self::from_readers(vocab, corpus)
    }

    pub fn from_readers<V: BufRead, C: Read>(vocab: V, corpus: C) -> Result<Self> {
        let (words, freqs) = read_vocab(vocab)?;
        let vocabulary = Vocabulary::new(words).context("invalid vocabulary file")?;

        let mut stream = vec![];
        for word in read_words(corpus) {
            let word = word.context("error reading training data file")?;
            if let Some(id) = vocabulary.id(&word) {
                stream.push(id);
            }
        }

        Ok(Dataset::new(vocabulary.words().to_vec(), freqs, vec![stream])?)
    }

    pub fn vocab_size(&self) -> usize {
        self.words.len()
    }

    pub fn vocabulary(&self) -> Result<Vocabulary, Error> {
        Vocabulary::new(self.words.clone())
    }

    /// The flattened corpus.
    pub fn corpus(&self) -> &[usize] {
        &self.docs[0]
    }

    pub fn corpus_mut(&mut self) -> &mut Vec<usize> {
        &mut self.docs[0]
    }
}
