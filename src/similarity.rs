//! Cosine similarity over feature vectors.
//!
//! Every ranking surface scores with these helpers: item-to-item similarity,
//! free-text query relevance, and user-affinity profiles all reduce to one
//! query vector scored against the indexed matrix.

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Defined as 0.0 when either vector has zero norm or when the lengths
/// differ, so callers never see a NaN or a panic from malformed rows.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scores `query` against every row of `matrix`; result index i is the
/// similarity to row i.
pub fn scores_against_all(query: &[f64], matrix: &[Vec<f64>]) -> Vec<f64> {
    matrix.iter().map(|row| cosine(query, row)).collect()
}

/// Elementwise mean of the given rows, used for user-affinity profiles.
///
/// Empty input yields an empty vector, which scores 0 against everything.
pub fn mean_vector(rows: &[&[f64]]) -> Vec<f64> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let mut mean = vec![0.0; first.len()];
    for row in rows {
        for (sum, value) in mean.iter_mut().zip(row.iter()) {
            *sum += value;
        }
    }
    let count = rows.len() as f64;
    for value in mean.iter_mut() {
        *value /= count;
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_is_maximally_similar_to_itself() {
        let v = vec![0.2, 0.0, 1.3, 0.5];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_norm_scores_zero_not_nan() {
        let zero = vec![0.0, 0.0];
        let v = vec![1.0, 2.0];
        assert_eq!(cosine(&zero, &v), 0.0);
        assert_eq!(cosine(&v, &zero), 0.0);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn opposite_vectors_score_negative_one() {
        let score = cosine(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((score + 1.0).abs() < 1e-12);
    }

    #[test]
    fn scores_align_to_matrix_rows() {
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let scores = scores_against_all(&[1.0, 0.0], &matrix);
        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 1.0).abs() < 1e-12);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0 && scores[2] < 1.0);
    }

    #[test]
    fn mean_vector_averages_rows() {
        let a = [1.0, 3.0];
        let b = [3.0, 1.0];
        assert_eq!(mean_vector(&[&a, &b]), vec![2.0, 2.0]);
    }

    #[test]
    fn mean_of_no_rows_is_empty() {
        assert!(mean_vector(&[]).is_empty());
    }
}
