use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::types::{Signature, UserRecord};

/// Offset subtracted from the Euclidean distance to obtain a similarity.
///
/// Calibrated so a distance below 0.6 is a strong match and above 1.2 a
/// clear mismatch.
const SIMILARITY_OFFSET: f64 = 1.3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("signature lengths differ: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Result of matching one signature against the enrolled users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    pub similarity: f32,
    pub name: Option<String>,
}

/// Euclidean distance between two signatures, accumulated in f64.
pub fn distance(a: &Signature, b: &Signature) -> Result<f64, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.values()
        .iter()
        .zip(b.values())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt())
}

/// Similarity in [0, 1]: `clamp(1.3 - distance, 0, 1)`.
pub fn compare(a: &Signature, b: &Signature) -> Result<f32, MatchError> {
    let d = distance(a, b)?;
    if !d.is_finite() {
        return Ok(0.0);
    }
    Ok((SIMILARITY_OFFSET - d).clamp(0.0, 1.0) as f32)
}

/// Find the most similar enrolled user.
///
/// Users are visited in name order and only a strictly higher similarity
/// replaces the current best, so ties go to the first name. Records whose
/// signature length differs from `probe` are skipped. `matched` is set only
/// when the best similarity exceeds `threshold`.
pub fn best_match(
    probe: &Signature,
    users: &BTreeMap<String, UserRecord>,
    threshold: f32,
) -> MatchResult {
    let mut best: Option<(&str, f32)> = None;

    for (name, record) in users {
        let similarity = match compare(probe, &record.signature) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(user = %name, error = %e, "skipping enrolled signature");
                continue;
            }
        };
        let highest = best.map_or(0.0, |(_, s)| s);
        if similarity > highest {
            best = Some((name, similarity));
        }
    }

    match best {
        Some((name, similarity)) if similarity > threshold => MatchResult {
            matched: true,
            similarity,
            name: Some(name.to_string()),
        },
        Some((_, similarity)) => MatchResult {
            matched: false,
            similarity,
            name: None,
        },
        None => MatchResult {
            matched: false,
            similarity: 0.0,
            name: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sig(values: &[f32]) -> Signature {
        Signature::new(values.to_vec())
    }

    fn record(values: &[f32]) -> UserRecord {
        UserRecord {
            signature: sig(values),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_self_match_is_exact() {
        let samples = [
            vec![0.0; 120],
            (0..120).map(|i| i as f32 * 0.37 - 9.0).collect(),
            vec![1e6, -1e6, 3.5],
        ];
        for s in samples {
            let s = Signature::new(s);
            assert_eq!(compare(&s, &s).unwrap(), 1.0);
        }
    }

    #[test]
    fn test_compare_is_symmetric() {
        let a = sig(&[0.1, 0.5, -0.3, 0.9]);
        let b = sig(&[0.4, 0.1, 0.2, 0.6]);
        assert_eq!(compare(&a, &b).unwrap(), compare(&b, &a).unwrap());
    }

    #[test]
    fn test_similarity_calibration() {
        let base = sig(&[0.0, 0.0, 0.0]);
        assert_eq!(compare(&base, &sig(&[0.3, 0.0, 0.0])).unwrap(), 1.0);
        let s = compare(&base, &sig(&[0.0, 1.0, 0.0])).unwrap();
        assert!((s - 0.3).abs() < 1e-6);
        assert_eq!(compare(&base, &sig(&[0.0, 0.0, 2.0])).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_at_offset_boundary_is_full_similarity() {
        // 0.3 is not exact in f32; the f64 path must still land on 1.0.
        let base = sig(&[0.0; 120]);
        let mut shifted = vec![0.0; 120];
        shifted[0] = 0.3;
        assert_eq!(compare(&base, &sig(&shifted)).unwrap(), 1.0);

        let d = distance(&base, &sig(&shifted)).unwrap();
        assert!((d - 0.3).abs() < 1e-7);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = compare(&sig(&[0.0; 3]), &sig(&[0.0; 4])).unwrap_err();
        assert_eq!(err, MatchError::LengthMismatch { left: 3, right: 4 });
    }

    #[test]
    fn test_best_match_picks_highest() {
        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), record(&[0.0, 0.0]));
        users.insert("bob".to_string(), record(&[0.5, 0.0]));
        let result = best_match(&sig(&[0.45, 0.0]), &users, 0.70);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_best_match_below_threshold_is_unknown() {
        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), record(&[0.0, 0.0]));
        let result = best_match(&sig(&[1.0, 0.0]), &users, 0.70);
        assert!(!result.matched);
        assert_eq!(result.name, None);
        assert!((result.similarity - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_threshold_is_strict() {
        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), record(&[0.0]));
        // similarity exactly 0.5 against a 0.5 threshold
        let result = best_match(&sig(&[0.8]), &users, 0.5);
        assert!(!result.matched);
    }

    #[test]
    fn test_best_match_tie_goes_to_first_name() {
        let mut users = BTreeMap::new();
        users.insert("bob".to_string(), record(&[0.1]));
        users.insert("alice".to_string(), record(&[-0.1]));
        let result = best_match(&sig(&[0.0]), &users, 0.70);
        assert_eq!(result.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_best_match_skips_mismatched_records() {
        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), record(&[0.0, 0.0, 0.0]));
        users.insert("bob".to_string(), record(&[0.0, 0.0]));
        let result = best_match(&sig(&[0.0, 0.0]), &users, 0.70);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_best_match_empty_store() {
        let result = best_match(&sig(&[0.0]), &BTreeMap::new(), 0.70);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }
}
