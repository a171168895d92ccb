// ── Vector math utilities ──────────────────────────────────────────────
//
// Pure functions over embedding vectors. Accumulation happens in f64 so that
// 768-dim dot products do not lose precision; results are stored as f32.

/// L2 norm of a vector. 0.0 for an empty vector.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// `v / ||v||`. A zero (or empty) vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm < 1e-12 {
        return v.to_vec();
    }
    v.iter().map(|x| (*x as f64 / norm) as f32).collect()
}

/// True when every element is finite (no NaN / ±Inf).
pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Weighted, L2-normalized fusion of the present inputs.
///
/// Absent inputs are dropped and the remaining weights renormalized to sum
/// to 1. Inputs whose length differs from the first present vector are
/// ignored. Returns `None` when nothing usable is present.
pub fn combine(inputs: &[(Option<&[f32]>, f64)]) -> Option<Vec<f32>> {
    let present: Vec<(&[f32], f64)> = inputs
        .iter()
        .filter_map(|(v, w)| (*v).filter(|v| !v.is_empty()).map(|v| (v, *w)))
        .filter(|(_, w)| w.is_finite() && *w > 0.0)
        .collect();

    let dim = present.first()?.0.len();
    let present: Vec<(&[f32], f64)> = present.into_iter().filter(|(v, _)| v.len() == dim).collect();

    let total: f64 = present.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }

    let mut acc = vec![0.0f64; dim];
    for (v, w) in &present {
        let w = w / total;
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += w * (*x as f64);
        }
    }

    let norm = acc.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm < 1e-12 {
        return Some(acc.into_iter().map(|x| x as f32).collect());
    }
    Some(acc.into_iter().map(|x| (x / norm) as f32).collect())
}

/// Cosine similarity in `[-1, 1]`. Returns 0.0 if either vector is empty,
/// has zero norm, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 || !denom.is_finite() {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Indices and scores of the `top_k` candidates most similar to `query`,
/// best first, keeping only scores `>= threshold`.
pub fn rank_by_similarity(
    query: &[f32],
    candidates: &[Vec<f32>],
    top_k: usize,
    threshold: f64,
) -> Vec<(usize, f64)> {
    let mut scored: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, c)))
        .filter(|(_, s)| *s >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_and_empty() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_stays_bounded() {
        let vs: Vec<Vec<f32>> = vec![
            vec![1e-20, 3.0, -7.5],
            vec![1e20, -1e20, 0.5],
            vec![-0.3, -0.3, -0.3],
            vec![3.0, 3.0, 3.0],
        ];
        for a in &vs {
            for b in &vs {
                let s = cosine_similarity(a, b);
                assert!((-1.0..=1.0).contains(&s), "{} out of bounds", s);
            }
        }
    }

    #[test]
    fn normalize_unit_length() {
        let n = normalize(&[3.0, 4.0]);
        assert!(approx_eq(&n, &[0.6, 0.8]));
        assert!((l2_norm(&n) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_is_noop() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn combine_single_input_is_normalize() {
        let v = vec![2.0f32, -1.0, 0.5];
        let combined = combine(&[(Some(v.as_slice()), 1.0)]).unwrap();
        assert!(approx_eq(&combined, &normalize(&v)));

        // Weight magnitude is irrelevant for a single input.
        let combined = combine(&[(Some(v.as_slice()), 0.3), (None, 0.7)]).unwrap();
        assert!(approx_eq(&combined, &normalize(&v)));
    }

    #[test]
    fn combine_renormalizes_present_weights() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        let combined = combine(&[(Some(a.as_slice()), 0.6), (None, 0.3), (Some(b.as_slice()), 0.6)]).unwrap();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert!(approx_eq(&combined, &[h, h]));
    }

    #[test]
    fn combine_nothing_present() {
        assert!(combine(&[]).is_none());
        assert!(combine(&[(None, 0.6), (None, 0.4)]).is_none());
    }

    #[test]
    fn rank_orders_and_filters() {
        let q = vec![1.0f32, 0.0];
        let cands = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![1.0, 0.0], vec![-1.0, 0.0]];
        let ranked = rank_by_similarity(&q, &cands, 2, 0.0);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[1].0, 1);
        assert!(rank_by_similarity(&q, &cands, 10, 0.5).iter().all(|(_, s)| *s >= 0.5));
    }
}
