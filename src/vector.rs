//! Vector math used by the search engine.
//!
//! Every function here is pure: no I/O, no shared state, deterministic
//! output for a given input. Mismatched lengths are reported as
//! [`VectorError::DimensionMismatch`] and never coerced.

use rayon::prelude::*;

/// Errors raised by vector operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A payload paired with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

fn ensure_same_len(a: &[f32], b: &[f32]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1].
///
/// Returns 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    ensure_same_len(a, b)?;

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok((dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Euclidean distance between two vectors. Never negative.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    ensure_same_len(a, b)?;

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

/// Scale a vector to unit length. A zero vector is returned unchanged.
pub fn normalize_vector(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Element-wise mean of a set of equal-length vectors.
///
/// An empty input yields an empty vector; callers must check before using
/// the result in further similarity computations.
pub fn average_vectors(vectors: &[Vec<f32>]) -> Result<Vec<f32>, VectorError> {
    let Some(first) = vectors.first() else {
        return Ok(vec![]);
    };

    let mut sum = vec![0.0f32; first.len()];
    for v in vectors {
        ensure_same_len(first, v)?;
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }

    let count = vectors.len() as f32;
    Ok(sum.into_iter().map(|x| x / count).collect())
}

/// Score every candidate against `query` and return the best `k`.
///
/// Results are ordered by descending score. Exact ties keep the candidates'
/// input order. `k == 0` yields an empty result.
pub fn find_top_k_similar<T>(
    query: &[f32],
    candidates: &[(&[f32], T)],
    k: usize,
) -> Result<Vec<Scored<T>>, VectorError>
where
    T: Clone + Send + Sync,
{
    if k == 0 {
        return Ok(vec![]);
    }

    let mut results: Vec<Scored<T>> = candidates
        .par_iter()
        .map(|(vector, payload)| {
            cosine_similarity(query, vector).map(|score| Scored {
                item: payload.clone(),
                score,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // sort_by is stable, so ties stay in input order
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(k);

    Ok(results)
}

/// Greedy near-score deduplication.
///
/// Walks `results` in order and keeps a result only if no already kept
/// result has a score within `1 - threshold` of it. This compares scores,
/// not vectors: two different products with nearly equal relevance collapse
/// into one.
pub fn filter_similar_results<T>(results: Vec<Scored<T>>, threshold: f32) -> Vec<Scored<T>> {
    let window = 1.0 - threshold;
    let mut kept: Vec<Scored<T>> = Vec::with_capacity(results.len());

    for result in results {
        let too_close = kept
            .iter()
            .any(|k| (k.score - result.score).abs() < window);
        if !too_close {
            kept.push(result);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn sample_vectors() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 2.0, 3.0],
            vec![-1.0, 0.5, 2.0],
            vec![0.0, 0.0, 1.0],
            vec![3.0, -2.0, 0.5],
            vec![0.1, 0.1, 0.1],
        ]
    }

    #[test]
    fn test_cosine_symmetric() {
        let vectors = sample_vectors();
        for a in &vectors {
            for b in &vectors {
                let ab = cosine_similarity(a, b).unwrap();
                let ba = cosine_similarity(b, a).unwrap();
                assert!((ab - ba).abs() < EPS);
            }
        }
    }

    #[test]
    fn test_cosine_self_is_one() {
        for v in sample_vectors() {
            let score = cosine_similarity(&v, &v).unwrap();
            assert!((score - 1.0).abs() < EPS, "got {score}");
        }
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        for v in sample_vectors() {
            assert_eq!(cosine_similarity(&v, &zero).unwrap(), 0.0);
            assert_eq!(cosine_similarity(&zero, &v).unwrap(), 0.0);
        }
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < EPS);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < EPS);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let result = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
        assert_eq!(
            result,
            Err(VectorError::DimensionMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn test_euclidean_distance() {
        let vectors = sample_vectors();
        for a in &vectors {
            assert_eq!(euclidean_distance(a, a).unwrap(), 0.0);
            for b in &vectors {
                assert!(euclidean_distance(a, b).unwrap() >= 0.0);
            }
        }
        let d = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 5.0).abs() < EPS);
        assert!(euclidean_distance(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_normalize_vector() {
        for v in sample_vectors() {
            let n = normalize_vector(&v);
            assert!((l2_norm(&n) - 1.0).abs() < EPS);
        }
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(normalize_vector(&zero), zero);
    }

    #[test]
    fn test_average_vectors() {
        assert!(average_vectors(&[]).unwrap().is_empty());

        let v = vec![0.25, -1.0, 4.0];
        assert_eq!(average_vectors(&[v.clone()]).unwrap(), v);

        let avg = average_vectors(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 4.0]);

        let mismatch = average_vectors(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(mismatch, Err(VectorError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_top_k_sorted_descending() {
        let vectors = sample_vectors();
        let candidates: Vec<(&[f32], usize)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (v.as_slice(), i))
            .collect();

        let results = find_top_k_similar(&[1.0, 2.0, 3.0], &candidates, 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].item, 0);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_top_k_bounds() {
        let vectors = sample_vectors();
        let candidates: Vec<(&[f32], usize)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (v.as_slice(), i))
            .collect();

        let all = find_top_k_similar(&[0.0, 0.0, 1.0], &candidates, 100).unwrap();
        assert_eq!(all.len(), candidates.len());

        let none = find_top_k_similar(&[0.0, 0.0, 1.0], &candidates, 0).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_top_k_ties_keep_input_order() {
        let same = vec![1.0, 1.0];
        let candidates: Vec<(&[f32], &str)> = vec![
            (same.as_slice(), "first"),
            (same.as_slice(), "second"),
            (same.as_slice(), "third"),
        ];

        let results = find_top_k_similar(&[2.0, 2.0], &candidates, 3).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.item).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_top_k_propagates_mismatch() {
        let short = vec![1.0];
        let candidates: Vec<(&[f32], u64)> = vec![(short.as_slice(), 1)];
        let result = find_top_k_similar(&[1.0, 0.0], &candidates, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_similar_results_drops_close_scores() {
        let results = vec![
            Scored { item: 1, score: 0.90 },
            Scored { item: 2, score: 0.89 },
            Scored { item: 3, score: 0.70 },
            Scored { item: 4, score: 0.69 },
        ];

        // window of 0.05
        let kept = filter_similar_results(results, 0.95);
        let ids: Vec<i32> = kept.iter().map(|r| r.item).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_filter_similar_results_threshold_one_keeps_all() {
        let results = vec![
            Scored { item: 1, score: 0.5 },
            Scored { item: 2, score: 0.5 },
        ];
        assert_eq!(filter_similar_results(results, 1.0).len(), 2);
    }
}
