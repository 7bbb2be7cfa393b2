//! Embedding vector invariants (data model invariant 2: fixed dimension,
//! finite values) and the cosine-similarity primitive shared by the scorer,
//! the negative miner, and the pathfinder.

use crate::error::{Error, Result};

/// Check that `vector` is non-empty, finite throughout, and (if `expected`
/// is given) matches the expected dimension.
pub fn validate_embedding(vector: &[f32], expected_dim: Option<usize>) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::InvalidInput("embedding vector is empty".into()));
    }
    if let Some(dim) = expected_dim {
        if vector.len() != dim {
            return Err(Error::InvalidInput(format!(
                "embedding dimension {} does not match expected dimension {dim}",
                vector.len()
            )));
        }
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(
            "embedding vector contains non-finite values".into(),
        ));
    }
    Ok(())
}

/// Cosine similarity mapped from `[-1, 1]` into `[0, 1]`.
///
/// Returns `0.0` for mismatched dimensions or zero-norm vectors rather than
/// dividing by zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

/// `true` if the vector is all zeros — the "embedding failed" sentinel the
/// orchestrator checks before scoring.
#[must_use]
pub fn is_all_zero(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;

    #[test]
    fn identical_vectors_are_maximally_similar() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_are_midpoint_similar() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimension_is_zero_not_a_panic() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let v = vec![1.0, f32::NAN];
        assert!(validate_embedding(&v, None).is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let v = vec![1.0, 0.0];
        assert!(validate_embedding(&v, Some(4)).is_err());
    }

    #[test]
    fn all_zero_detection() {
        assert!(is_all_zero(&[0.0, 0.0, 0.0]));
        assert!(!is_all_zero(&[0.0, 0.1, 0.0]));
    }

    proptest::proptest! {
        #[test]
        fn cosine_similarity_always_in_unit_range(
            a in proptest::collection::vec(-100.0f32..100.0, 1..16),
            b in proptest::collection::vec(-100.0f32..100.0, 1..16),
        ) {
            let score = cosine_similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&score) || score == 0.0);
            prop_assert!(score.is_finite());
        }

        #[test]
        fn cosine_similarity_is_symmetric(
            a in proptest::collection::vec(-100.0f32..100.0, 2..16),
            b in proptest::collection::vec(-100.0f32..100.0, 2..16),
        ) {
            if a.len() == b.len() {
                prop_assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-4);
            }
        }
    }
}
