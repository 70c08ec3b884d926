//! Skip-gram (input, label) pairs from a token stream.

use std::ops::Range;

use rand::Rng;

use crate::error::{Error, Result};

/// Iterator over `(center word, context word)` pairs.
///
/// For each position a radius is drawn uniformly from `1..=max_window`, and
/// every other word within that radius becomes a label for the center word.
/// Pairs come out in stream order.
pub struct SkipGramWindows<'a, R> {
    stream: &'a [usize],
    max_window: usize,
    rng: R,
    center: usize,
    next_center: usize,
    context: Range<usize>,
}

impl<'a, R: Rng> SkipGramWindows<'a, R> {
    pub fn new(stream: &'a [usize], max_window: usize, rng: R) -> Result<Self> {
        if max_window == 0 {
            return Err(Error::InvalidConfig(
                "window size must be at least 1".to_string(),
            ));
        }
        Ok(SkipGramWindows {
            stream,
            max_window,
            rng,
            center: 0,
            next_center: 0,
            context: 0..0,
        })
    }
}

impl<'a, R: Rng> Iterator for SkipGramWindows<'a, R> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        loop {
            for j in self.context.by_ref() {
                if j != self.center {
                    return Some((self.stream[self.center], self.stream[j]));
                }
            }
            if self.next_center >= self.stream.len() {
                return None;
            }
            self.center = self.next_center;
            self.next_center += 1;
            let radius = self.rng.gen_range(1..=self.max_window);
            self.context = self.center.saturating_sub(radius)
                ..(self.center + radius + 1).min(self.stream.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn radius_one_pairs() {
        let stream = [10, 11, 12];
        let pairs: Vec<_> = SkipGramWindows::new(&stream, 1, StdRng::seed_from_u64(0))
            .unwrap()
            .collect();
        assert_eq!(pairs, vec![(10, 11), (11, 10), (11, 12), (12, 11)]);
    }

    #[test]
    fn pairs_stay_within_window() {
        let stream: Vec<usize> = (0..200).collect();
        let pairs: Vec<_> = SkipGramWindows::new(&stream, 3, StdRng::seed_from_u64(4))
            .unwrap()
            .collect();
        assert!(!pairs.is_empty());
        for &(center, context) in &pairs {
            assert_ne!(center, context);
            assert!(center.abs_diff(context) <= 3);
        }
        // Every word gets at least its immediate neighbours.
        for i in 0..199 {
            assert!(pairs.contains(&(i, i + 1)));
            assert!(pairs.contains(&(i + 1, i)));
        }
        // Centers come out in order.
        assert!(pairs.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn degenerate_inputs() {
        assert!(SkipGramWindows::new(&[1, 2], 0, StdRng::seed_from_u64(0)).is_err());
        let none: Vec<_> = SkipGramWindows::new(&[], 2, StdRng::seed_from_u64(0))
            .unwrap()
            .collect();
        assert!(none.is_empty());
        let single: Vec<_> = SkipGramWindows::new(&[7], 2, StdRng::seed_from_u64(0))
            .unwrap()
            .collect();
        assert!(single.is_empty());
    }
}
