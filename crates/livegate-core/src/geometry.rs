//! Eye aspect ratio and head pose from a landmark set.
//!
//! Head pose is a perspective-n-point solve of [`HEAD_MODEL_POINTS`] against
//! their projections: a linear DLT estimate seeds a Levenberg–Marquardt
//! refinement of the reprojection error. With only six correspondences this
//! is a few dozen 12×6 products per frame.

use nalgebra::{DMatrix, Matrix3, Matrix6, Point3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use thiserror::Error;

use crate::topology::{HEAD_MODEL_POINTS, POSE_LANDMARKS};
use crate::types::{FrameSize, HeadPose, LandmarkFrame};

/// Model points are divided by this before the DLT to keep the system well
/// conditioned against normalized image coordinates.
const MODEL_SCALE: f64 = 225.0;
const LM_MAX_ITERATIONS: usize = 30;
const LM_INITIAL_DAMPING: f64 = 1e-3;
const LM_STEP: f64 = 1e-6;
/// Mean normalized reprojection error above which the solve is rejected.
const MAX_REPROJECTION_ERROR: f64 = 0.05;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("frame size {width}x{height} has no usable focal length")]
    DegenerateFrame { width: u32, height: u32 },
    #[error("pose correspondences are degenerate")]
    Degenerate,
    #[error("pose solver did not converge (reprojection error {0:.4})")]
    NotConverged(f64),
}

/// A strictly positive, finite divisor.
///
/// Every ratio in the pipeline divides by a landmark distance that collapses
/// to zero on degenerate input; obtaining a `Divisor` is the precondition for
/// performing the division at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divisor(f32);

impl Divisor {
    pub fn new(value: f32) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn divide(self, numerator: f32) -> f32 {
        numerator / self.0
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// Euclidean distance between two landmarks, including depth.
pub fn distance(a: &Point3<f32>, b: &Point3<f32>) -> f32 {
    nalgebra::distance(a, b)
}

/// Mean eye aspect ratio of both eyes.
///
/// Each eye is given as six indices `p0..p5` in contour order. An eye whose
/// corners coincide is skipped; `None` when neither eye is measurable.
pub fn eye_aspect_ratio(
    landmarks: &LandmarkFrame,
    left_eye: &[usize; 6],
    right_eye: &[usize; 6],
) -> Option<f32> {
    let ratios: Vec<f32> = [left_eye, right_eye]
        .into_iter()
        .filter_map(|eye| single_eye_ratio(landmarks, eye))
        .collect();

    if ratios.is_empty() {
        return None;
    }
    Some(ratios.iter().sum::<f32>() / ratios.len() as f32)
}

fn single_eye_ratio(landmarks: &LandmarkFrame, eye: &[usize; 6]) -> Option<f32> {
    let p = eye.map(|i| landmarks.at(i));
    let vertical = distance(&p[1], &p[5]) + distance(&p[2], &p[4]);
    let horizontal = Divisor::new(2.0 * distance(&p[0], &p[3]))?;
    Some(horizontal.divide(vertical))
}

/// Estimate head pose in degrees from the six pose landmarks.
///
/// Camera intrinsics are a pinhole with focal length equal to the frame
/// width, principal point at the frame centre and no lens distortion.
pub fn estimate_head_pose(
    landmarks: &LandmarkFrame,
    frame: FrameSize,
) -> Result<HeadPose, PoseError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(PoseError::DegenerateFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    let focal = f64::from(frame.width);
    let cx = f64::from(frame.width) / 2.0;
    let cy = f64::from(frame.height) / 2.0;

    let model: [Vector3<f64>; 6] = HEAD_MODEL_POINTS.map(|p| Vector3::new(p[0], p[1], p[2]));
    let image: [(f64, f64); 6] = POSE_LANDMARKS.map(|i| {
        let p = landmarks.at(i);
        ((f64::from(p.x) - cx) / focal, (f64::from(p.y) - cy) / focal)
    });

    // Eye corners (model points 2 and 3) must be apart in the image.
    let (eu, ev) = (image[2].0 - image[3].0, image[2].1 - image[3].1);
    if Divisor::new(eu.hypot(ev) as f32).is_none() {
        return Err(PoseError::Degenerate);
    }

    let (rotation, translation) = solve_dlt(&model, &image)?;
    let (rotation, translation) = refine(&model, &image, rotation, translation);

    let error = mean_reprojection_error(&model, &image, &rotation, &translation);
    if !error.is_finite() || error > MAX_REPROJECTION_ERROR || translation.z <= 0.0 {
        return Err(PoseError::NotConverged(error));
    }

    Ok(euler_degrees(&rotation))
}

/// Linear estimate of `[R | t]` from six correspondences.
fn solve_dlt(
    model: &[Vector3<f64>; 6],
    image: &[(f64, f64); 6],
) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let mut a = DMatrix::<f64>::zeros(12, 12);
    for (i, (point, &(u, v))) in model.iter().zip(image.iter()).enumerate() {
        let x = point / MODEL_SCALE;
        let row = [x.x, x.y, x.z, 1.0];
        for k in 0..4 {
            a[(2 * i, k)] = row[k];
            a[(2 * i, 8 + k)] = -u * row[k];
            a[(2 * i + 1, 4 + k)] = row[k];
            a[(2 * i + 1, 8 + k)] = -v * row[k];
        }
    }

    // The projection matrix is the eigenvector of AᵀA with the smallest eigenvalue.
    let eigen = (a.transpose() * &a).symmetric_eigen();
    let smallest = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))
        .map(|(i, _)| i)
        .ok_or(PoseError::Degenerate)?;
    let p = eigen.eigenvectors.column(smallest);

    let mut m = Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]) / MODEL_SCALE;
    let mut t = Vector3::new(p[3], p[7], p[11]);
    if m.determinant() < 0.0 {
        m = -m;
        t = -t;
    }

    let svd = m.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(PoseError::Degenerate),
    };
    let scale = svd.singular_values.mean();
    if !(scale.is_finite() && scale > f64::EPSILON) {
        return Err(PoseError::Degenerate);
    }

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        r = -r;
    }
    Ok((Rotation3::from_matrix_unchecked(r), t / scale))
}

fn residuals(
    model: &[Vector3<f64>; 6],
    image: &[(f64, f64); 6],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> SVector<f64, 12> {
    let mut r = SVector::<f64, 12>::zeros();
    for (i, (point, &(u, v))) in model.iter().zip(image.iter()).enumerate() {
        let c = rotation * point + translation;
        r[2 * i] = c.x / c.z - u;
        r[2 * i + 1] = c.y / c.z - v;
    }
    r
}

fn mean_reprojection_error(
    model: &[Vector3<f64>; 6],
    image: &[(f64, f64); 6],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> f64 {
    let r = residuals(model, image, rotation, translation);
    (0..6)
        .map(|i| (r[2 * i].powi(2) + r[2 * i + 1].powi(2)).sqrt())
        .sum::<f64>()
        / 6.0
}

fn unpack(params: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    (
        Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2])),
        Vector3::new(params[3], params[4], params[5]),
    )
}

/// Levenberg–Marquardt over (rotation vector, translation).
fn refine(
    model: &[Vector3<f64>; 6],
    image: &[(f64, f64); 6],
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
) -> (Rotation3<f64>, Vector3<f64>) {
    let axis = rotation.scaled_axis();
    let mut params = Vector6::new(
        axis.x,
        axis.y,
        axis.z,
        translation.x,
        translation.y,
        translation.z,
    );
    let cost_of = |params: &Vector6<f64>| {
        let (r, t) = unpack(params);
        residuals(model, image, &r, &t).norm_squared()
    };

    let mut cost = cost_of(&params);
    let mut damping = LM_INITIAL_DAMPING;

    for _ in 0..LM_MAX_ITERATIONS {
        let (r, t) = unpack(&params);
        let base = residuals(model, image, &r, &t);

        let mut jacobian = SMatrix::<f64, 12, 6>::zeros();
        for k in 0..6 {
            let mut shifted = params;
            shifted[k] += LM_STEP;
            let (r, t) = unpack(&shifted);
            let column = (residuals(model, image, &r, &t) - base) / LM_STEP;
            jacobian.set_column(k, &column);
        }

        let jtj = jacobian.transpose() * jacobian;
        let gradient = jacobian.transpose() * base;
        let damped = jtj + Matrix6::from_diagonal(&jtj.diagonal()) * damping;
        let Some(step) = damped.lu().solve(&(-gradient)) else {
            break;
        };

        let candidate = params + step;
        let candidate_cost = cost_of(&candidate);
        if candidate_cost.is_finite() && candidate_cost < cost {
            let converged = cost - candidate_cost < 1e-14;
            params = candidate;
            cost = candidate_cost;
            damping = (damping / 10.0).max(1e-9);
            if converged {
                break;
            }
        } else {
            damping *= 10.0;
            if damping > 1e6 {
                break;
            }
        }
    }

    unpack(&params)
}

/// Decompose `R = Rz(roll) · Ry(yaw) · Rx(pitch)` into degrees.
fn euler_degrees(rotation: &Rotation3<f64>) -> HeadPose {
    let m = rotation.matrix();
    let pitch = m[(2, 1)].atan2(m[(2, 2)]);
    let yaw = (-m[(2, 0)]).atan2((m[(2, 1)].powi(2) + m[(2, 2)].powi(2)).sqrt());
    let roll = m[(1, 0)].atan2(m[(0, 0)]);
    HeadPose::new(
        pitch.to_degrees() as f32,
        yaw.to_degrees() as f32,
        roll.to_degrees() as f32,
    )
}
