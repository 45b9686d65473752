use crate::models::RankedHit;
use crate::tfidf::{densify, sparse_dot, FittedIndex, SparseVec};

/// Cosine similarity between two dense vectors.
///
/// Mismatched lengths and zero vectors score 0.0 rather than erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Encode a dense vector as a little-endian f32 BLOB.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(v.len() * 4);
    for x in v {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 BLOB back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn sort_and_take(mut hits: Vec<RankedHit>, k: usize) -> Vec<RankedHit> {
    // stable sort: ties keep fragment order
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

/// Rank the fitted rows against a query string, best first.
///
/// Rows and transformed queries are already L2-normalized, so the sparse
/// dot product is the cosine score. A fully out-of-vocabulary query scores
/// every row 0.0; an index with no rows yields no hits.
pub fn rank(index: &FittedIndex, query: &str, k: usize) -> Vec<RankedHit> {
    let query_vec = index.transform(query);
    rank_rows(&query_vec, &index.rows, k)
}

pub fn rank_rows(query_vec: &SparseVec, rows: &[SparseVec], k: usize) -> Vec<RankedHit> {
    let hits = rows
        .iter()
        .enumerate()
        .map(|(index, row)| RankedHit {
            index,
            score: sparse_dot(query_vec, row),
        })
        .collect();
    sort_and_take(hits, k)
}

/// Rank dense stored vectors against a query string, best first.
pub fn rank_dense(
    index: &FittedIndex,
    vectors: &[Vec<f32>],
    query: &str,
    k: usize,
) -> Vec<RankedHit> {
    let query_vec = densify(&index.transform(query), index.vocab_size());
    let hits = vectors
        .iter()
        .enumerate()
        .map(|(index, v)| RankedHit {
            index,
            score: cosine_similarity(&query_vec, v),
        })
        .collect();
    sort_and_take(hits, k)
}
