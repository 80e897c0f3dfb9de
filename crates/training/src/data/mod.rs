//! Labelled sentence sets and per-epoch shuffled minibatches.

use std::{fs, path::Path};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::TrainingError;

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

/// Parallel lists of sentences and their gold label names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    sentences: Vec<String>,
    labels: Vec<String>,
}

impl Dataset {
    pub fn new(sentences: Vec<String>, labels: Vec<String>) -> Result<Self> {
        if sentences.len() != labels.len() {
            return Err(TrainingError::validation(vec![format!(
                "{} sentences but {} labels",
                sentences.len(),
                labels.len()
            )]));
        }
        Ok(Self { sentences, labels })
    }

    /// Reads `label<TAB>sentence` lines; blank lines are skipped.
    pub fn from_tsv(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            TrainingError::initialization(format!("failed to read {}: {err}", path.display()))
        })?;

        let mut sentences = Vec::new();
        let mut labels = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (label, sentence) = line.split_once('\t').ok_or_else(|| {
                TrainingError::initialization(format!(
                    "{}:{}: expected `label<TAB>sentence`",
                    path.display(),
                    line_no + 1
                ))
            })?;
            labels.push(label.trim().to_string());
            sentences.push(sentence.to_string());
        }
        log::debug!("read {} examples from {}", sentences.len(), path.display());
        Self::new(sentences, labels)
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn sentence(&self, index: usize) -> &str {
        &self.sentences[index]
    }
}

/// Number of minibatches one epoch over `len` examples yields.
///
/// Trailing partial batches are dropped unless the whole set is smaller
/// than one batch.
pub fn batches_per_epoch(len: usize, batch_size: usize) -> usize {
    if len == 0 || batch_size == 0 {
        0
    } else if len < batch_size {
        1
    } else {
        len / batch_size
    }
}

/// Index batches over a freshly shuffled order for one epoch.
///
/// The order depends only on `seed` and `epoch`.
#[derive(Debug, Clone)]
pub struct ShuffledBatches {
    order: Vec<usize>,
    batch_size: usize,
    remaining: usize,
    cursor: usize,
}

impl ShuffledBatches {
    pub fn new(len: usize, batch_size: usize, seed: u64, epoch: usize) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);
        Self {
            order,
            batch_size: batch_size.max(1),
            remaining: batches_per_epoch(len, batch_size),
            cursor: 0,
        }
    }
}

impl Iterator for ShuffledBatches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ShuffledBatches {}
