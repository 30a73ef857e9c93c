//! Frontal-ness scoring and geometric signature extraction.

use crate::geometry::{distance, Divisor};
use crate::topology::{
    LEFT_EYE_OUTER, NOSE_TIP, RIGHT_EYE_OUTER, SIGNATURE_LANDMARKS, SIGNATURE_LEN,
};
use crate::types::{LandmarkFrame, Signature};

/// Symmetry of the outer eye corners about the nose tip.
///
/// 1.0 is perfectly frontal, values towards 0 indicate a profile view.
/// Degenerate landmarks (both distances zero) score 0.
pub fn pose_score(landmarks: &LandmarkFrame) -> f32 {
    let nose = landmarks.at(NOSE_TIP);
    let left = distance(&landmarks.at(LEFT_EYE_OUTER), &nose);
    let right = distance(&landmarks.at(RIGHT_EYE_OUTER), &nose);

    match Divisor::new(left.max(right)) {
        Some(longer) => longer.divide(left.min(right)).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Flattened signature landmarks relative to the nose tip, in units of
/// inter-ocular distance.
///
/// When the eye corners coincide the translated values are returned unscaled.
pub fn extract_signature(landmarks: &LandmarkFrame) -> Signature {
    let nose = landmarks.at(NOSE_TIP);
    let interocular = Divisor::new(distance(
        &landmarks.at(LEFT_EYE_OUTER),
        &landmarks.at(RIGHT_EYE_OUTER),
    ));

    let mut values = Vec::with_capacity(SIGNATURE_LEN);
    for &index in &SIGNATURE_LANDMARKS {
        let offset = landmarks.at(index) - nose;
        for component in [offset.x, offset.y, offset.z] {
            values.push(match interocular {
                Some(scale) => scale.divide(component),
                None => component,
            });
        }
    }
    Signature::new(values)
}
