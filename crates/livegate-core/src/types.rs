use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use image::RgbImage;
use nalgebra::Point3;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::topology::MESH_LANDMARK_COUNT;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("landmark set has {got} points, expected at least {expected}")]
    TooFewPoints { got: usize, expected: usize },
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

/// One detected face in one camera frame: x/y in pixels, z in relative depth.
///
/// Construction guarantees the canonical face-mesh topology is present, so
/// every index in [`crate::topology`] is addressable.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    points: Vec<Point3<f32>>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Point3<f32>>) -> Result<Self, LandmarkError> {
        if points.len() < MESH_LANDMARK_COUNT {
            return Err(LandmarkError::TooFewPoints {
                got: points.len(),
                expected: MESH_LANDMARK_COUNT,
            });
        }
        if let Some(index) = points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(LandmarkError::NonFinite { index });
        }
        Ok(Self { points })
    }

    /// Build from `[x, y, z]` rows, the layout landmark providers usually emit.
    pub fn from_rows(rows: &[[f32; 3]]) -> Result<Self, LandmarkError> {
        Self::new(rows.iter().map(|r| Point3::new(r[0], r[1], r[2])).collect())
    }

    /// Point at a topology index. Indices come from [`crate::topology`] and are
    /// always below [`MESH_LANDMARK_COUNT`].
    pub(crate) fn at(&self, index: usize) -> Point3<f32> {
        self.points[index]
    }

    pub fn get(&self, index: usize) -> Option<Point3<f32>> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Axis-aligned pixel bounding box as `(min_x, min_y, max_x, max_y)`.
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl HeadPose {
    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Pitch/yaw change from `initial`, each wrapped into [-180, 180).
    pub fn delta_from(&self, initial: &HeadPose) -> PoseDelta {
        PoseDelta {
            pitch: wrap_degrees(self.pitch - initial.pitch),
            yaw: wrap_degrees(self.yaw - initial.yaw),
        }
    }
}

fn wrap_degrees(angle: f32) -> f32 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

/// Pitch/yaw change relative to the pose captured at session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseDelta {
    pub pitch: f32,
    pub yaw: f32,
}

/// Normalized geometric face signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<f32>);

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for Signature {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// An enrolled user as held by a [`crate::UserStore`]; the name is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub signature: Signature,
    /// Written as RFC 3339. Timestamps without an offset are read as UTC.
    #[serde(deserialize_with = "timestamp_as_utc")]
    pub created_at: DateTime<Utc>,
}

fn timestamp_as_utc<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}

/// A captured camera frame handed from acquisition to the decision thread.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic capture counter, starting at 0.
    pub seq: u64,
    /// Capture time relative to the start of acquisition.
    pub captured_at: Duration,
    pub image: RgbImage,
}

impl Frame {
    pub fn size(&self) -> FrameSize {
        FrameSize::of(&self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_landmark_set() {
        let err = LandmarkFrame::new(vec![Point3::origin(); 10]).unwrap_err();
        assert_eq!(
            err,
            LandmarkError::TooFewPoints {
                got: 10,
                expected: MESH_LANDMARK_COUNT
            }
        );
    }

    #[test]
    fn test_rejects_nan_coordinate() {
        let mut points = vec![Point3::origin(); MESH_LANDMARK_COUNT];
        points[17].y = f32::NAN;
        let err = LandmarkFrame::new(points).unwrap_err();
        assert_eq!(err, LandmarkError::NonFinite { index: 17 });
    }

    #[test]
    fn test_bounding_box() {
        let mut points = vec![Point3::new(50.0, 60.0, 0.0); MESH_LANDMARK_COUNT];
        points[0] = Point3::new(10.0, 80.0, 0.0);
        points[1] = Point3::new(90.0, 20.0, 0.0);
        let frame = LandmarkFrame::new(points).unwrap();
        assert_eq!(frame.bounding_box(), (10.0, 20.0, 90.0, 80.0));
    }

    #[test]
    fn test_delta_wraps_across_half_turn() {
        // Frontal faces sit near pitch ±180 with the canonical model, so a
        // small real movement can cross the branch cut.
        let initial = HeadPose::new(179.0, 0.0, 0.0);
        let current = HeadPose::new(-170.0, 5.0, 0.0);
        let delta = current.delta_from(&initial);
        assert!((delta.pitch - 11.0).abs() < 1e-4);
        assert!((delta.yaw - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_signature_serializes_as_plain_array() {
        let sig = Signature::new(vec![0.5, -1.0]);
        assert_eq!(serde_json::to_string(&sig).unwrap(), "[0.5,-1.0]");
    }

    #[test]
    fn test_user_record_reads_naive_timestamp() {
        let record: UserRecord = serde_json::from_str(
            r#"{"signature": [0.5], "created_at": "2024-03-01T12:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T12:00:00.123456+00:00");

        let record: UserRecord = serde_json::from_str(
            r#"{"signature": [0.5], "created_at": "2024-03-01T14:00:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");

        assert!(serde_json::from_str::<UserRecord>(
            r#"{"signature": [0.5], "created_at": "yesterday"}"#
        )
        .is_err());
    }
}
