//! TF-IDF vectorization over fragment texts.
//!
//! Uses the standard smoothed formulation: `idf(t) = ln((1 + n) / (1 + df(t))) + 1`
//! with raw term counts for tf and L2-normalized rows, so cosine similarity
//! between two vectors reduces to a dot product. The vocabulary is fixed at
//! fit time; transforming later text drops out-of-vocabulary terms silently.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Sparse vector as `(column, weight)` pairs sorted by column.
pub type SparseVec = Vec<(u32, f32)>;

/// Lowercased tokens of at least two characters, split on anything that is
/// not alphanumeric or underscore. Unicode-aware, so Hebrew text tokenizes
/// the same way Latin text does.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// A fitted TF-IDF model: vocabulary, per-term IDF weights, and one
/// normalized sparse row per input text, in input order.
///
/// Persisted as a single JSON unit so the vocabulary, weights, and matrix
/// can never drift apart on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedIndex {
    pub vocabulary: HashMap<String, usize>,
    pub idf: Vec<f32>,
    pub rows: Vec<SparseVec>,
}

/// Fit a TF-IDF index over the given texts.
///
/// An empty corpus yields a degenerate index with an empty vocabulary and
/// no rows; callers are expected to handle the empty case downstream.
pub fn fit(texts: &[String]) -> FittedIndex {
    let tokenized: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_insert(0) += 1;
        }
    }

    // Deterministic column order: terms sorted lexicographically.
    let mut terms: Vec<&str> = df.keys().copied().collect();
    terms.sort_unstable();
    let vocabulary: HashMap<String, usize> = terms
        .iter()
        .enumerate()
        .map(|(i, t)| (t.to_string(), i))
        .collect();

    let n = texts.len();
    let idf: Vec<f32> = terms
        .iter()
        .map(|t| ((1 + n) as f32 / (1 + df[t]) as f32).ln() + 1.0)
        .collect();

    let rows = tokenized
        .iter()
        .map(|tokens| weigh(tokens, &vocabulary, &idf))
        .collect();

    FittedIndex {
        vocabulary,
        idf,
        rows,
    }
}

/// Count known terms, apply IDF weights, and L2-normalize.
fn weigh(tokens: &[String], vocabulary: &HashMap<String, usize>, idf: &[f32]) -> SparseVec {
    let mut counts: HashMap<usize, f32> = HashMap::new();
    for tok in tokens {
        if let Some(&col) = vocabulary.get(tok) {
            *counts.entry(col).or_insert(0.0) += 1.0;
        }
    }
    let mut row: SparseVec = counts
        .into_iter()
        .map(|(col, tf)| (col as u32, tf * idf[col]))
        .collect();
    row.sort_unstable_by_key(|(col, _)| *col);

    let norm: f32 = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in &mut row {
            *w /= norm;
        }
    }
    row
}

/// Dot product of two sorted sparse vectors.
pub fn sparse_dot(a: &SparseVec, b: &SparseVec) -> f32 {
    let mut dot = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

/// Expand a sparse vector to a dense one of the given dimension.
pub fn densify(vec: &SparseVec, dims: usize) -> Vec<f32> {
    let mut dense = vec![0.0; dims];
    for &(col, w) in vec {
        dense[col as usize] = w;
    }
    dense
}

impl FittedIndex {
    /// Vectorize text against the fitted vocabulary. Out-of-vocabulary
    /// terms contribute zero weight rather than erroring.
    pub fn transform(&self, text: &str) -> SparseVec {
        weigh(&tokenize(text), &self.vocabulary, &self.idf)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.idf.len()
    }

    /// Dense form of row `i`, for BLOB storage.
    pub fn dense_row(&self, i: usize) -> Vec<f32> {
        densify(&self.rows[i], self.vocab_size())
    }

    /// Persist the whole index (vocabulary + weights + rows) as one file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize index")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write index: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Malformed index file: {}", path.display()))
    }
}
