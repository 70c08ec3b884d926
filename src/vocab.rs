use std::collections::HashMap;
use std::ops::Index;

use crate::error::{Error, Result};

/// Sentence-boundary token. Newlines in a text corpus map to this word if the
/// vocabulary contains it.
pub const END_OF_SENTENCE: &str = "</s>";

/// Bijection between words and ids `0..len()`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    /// Word `i` gets id `i`. Fails on a repeated word.
    pub fn new(words: Vec<String>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            if ids.insert(word.clone(), i).is_some() {
                return Err(Error::DuplicateWord(word.clone()));
            }
        }
        Ok(Vocabulary { words, ids })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the id of a word, or None if it's not in the vocabulary.
    pub fn id(&self, word: &str) -> Option<usize> {
        self.ids.get(word).copied()
    }

    /// Get the word for an id. Panics if `id` is out of range.
    pub fn word(&self, id: usize) -> &str {
        &self.words[id]
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

impl Index<usize> for Vocabulary {
    type Output = str;

    fn index(&self, id: usize) -> &str {
        self.word(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_positions() {
        let v = Vocabulary::new(vec!["the".into(), "cat".into(), "</s>".into()]).unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.id("cat"), Some(1));
        assert_eq!(v.id(END_OF_SENTENCE), Some(2));
        assert_eq!(v.id("dog"), None);
        assert_eq!(&v[0], "the");
    }

    #[test]
    fn duplicates_rejected() {
        assert_eq!(
            Vocabulary::new(vec!["a".into(), "b".into(), "a".into()]).unwrap_err(),
            Error::DuplicateWord("a".into())
        );
    }
}
