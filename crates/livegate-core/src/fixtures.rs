//! Synthetic landmark fixtures.
//!
//! A canonical face is laid out in the same model space as
//! [`HEAD_MODEL_POINTS`](crate::topology::HEAD_MODEL_POINTS) and projected
//! through the same pinhole camera the pose estimator assumes, so pose,
//! pose score, EAR and signatures computed from a fixture are exact.

use image::{Rgb, RgbImage};
use nalgebra::{Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::topology::{HEAD_MODEL_POINTS, LEFT_EYE, MESH_LANDMARK_COUNT, POSE_LANDMARKS, RIGHT_EYE};
use crate::types::{FrameSize, LandmarkFrame};

pub const FRAME: FrameSize = FrameSize {
    width: 640,
    height: 480,
};

/// Distance from camera to nose tip, in model units.
const DEPTH: f64 = 1500.0;
const EYE_OPEN: f64 = 20.0;
const EYE_CLOSED: f64 = 4.0;

/// Builder for a projected synthetic face.
///
/// Pitch follows the pose estimator's convention, where a face looking
/// straight at the camera sits at 180° because the model is y-up.
#[derive(Debug, Clone)]
pub struct FaceFixture {
    pitch: f64,
    yaw: f64,
    roll: f64,
    eye_half_height: f64,
    shift: (f32, f32),
}

impl FaceFixture {
    pub fn frontal() -> Self {
        Self {
            pitch: 180.0,
            yaw: 0.0,
            roll: 0.0,
            eye_half_height: EYE_OPEN,
            shift: (0.0, 0.0),
        }
    }

    /// Rotate about the vertical axis by `degrees`.
    pub fn turned(mut self, degrees: f64) -> Self {
        self.yaw += degrees;
        self
    }

    /// Rotate about the horizontal axis by `degrees`.
    pub fn tilted(mut self, degrees: f64) -> Self {
        self.pitch += degrees;
        self
    }

    pub fn rolled(mut self, degrees: f64) -> Self {
        self.roll += degrees;
        self
    }

    pub fn eyes_closed(mut self) -> Self {
        self.eye_half_height = EYE_CLOSED;
        self
    }

    /// Translate the projected landmarks in pixels.
    pub fn shifted(mut self, dx: f32, dy: f32) -> Self {
        self.shift = (dx, dy);
        self
    }

    pub fn landmarks(&self) -> LandmarkFrame {
        let rotation = Rotation3::from_euler_angles(
            self.pitch.to_radians(),
            self.yaw.to_radians(),
            self.roll.to_radians(),
        );
        let focal = f64::from(FRAME.width);
        let cx = focal / 2.0;
        let cy = f64::from(FRAME.height) / 2.0;

        let points = self
            .model_points()
            .into_iter()
            .map(|p| {
                let c = rotation * p + Vector3::new(0.0, 0.0, DEPTH);
                Point3::new(
                    (focal * c.x / c.z + cx) as f32 + self.shift.0,
                    (focal * c.y / c.z + cy) as f32 + self.shift.1,
                    ((c.z - DEPTH) * focal / DEPTH) as f32,
                )
            })
            .collect();

        LandmarkFrame::new(points).expect("fixture always has a full mesh")
    }

    fn model_points(&self) -> Vec<Vector3<f64>> {
        let mut points: Vec<Vector3<f64>> = (0..MESH_LANDMARK_COUNT)
            .map(|i| {
                Vector3::new(
                    ((i * 37) % 301) as f64 - 150.0,
                    ((i * 53) % 401) as f64 - 200.0,
                    -(((i * 17) % 120) as f64) - 20.0,
                )
            })
            .collect();

        for (&index, model) in POSE_LANDMARKS.iter().zip(HEAD_MODEL_POINTS) {
            points[index] = Vector3::new(model[0], model[1], model[2]);
        }

        let h = self.eye_half_height;
        let eye_y = 170.0;
        let eye_z = -135.0;
        let left = [
            (-225.0, 0.0),
            (-185.0, h),
            (-140.0, h),
            (-100.0, 0.0),
            (-140.0, -h),
            (-185.0, -h),
        ];
        let right = [
            (100.0, 0.0),
            (140.0, h),
            (185.0, h),
            (225.0, 0.0),
            (185.0, -h),
            (140.0, -h),
        ];
        for (indices, contour) in [(LEFT_EYE, left), (RIGHT_EYE, right)] {
            for (index, (x, dy)) in indices.into_iter().zip(contour) {
                points[index] = Vector3::new(x, eye_y + dy, eye_z);
            }
        }

        points
    }
}

/// A deterministic high-detail RGB frame, dense in mid/high frequencies.
pub fn textured_frame(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(FRAME.width, FRAME.height, |x, y| {
        let base = (((x / 3) + (y / 5)) % 2) as u8 * 60 + 80;
        let noise: u8 = rng.gen_range(0..40);
        let v = base + noise;
        Rgb([v, v.saturating_sub(10), v.saturating_sub(20)])
    })
}

/// A uniform RGB frame with no texture at all.
pub fn flat_frame(level: u8) -> RgbImage {
    RgbImage::from_pixel(FRAME.width, FRAME.height, Rgb([level, level, level]))
}
