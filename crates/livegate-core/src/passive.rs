//! Passive liveness via texture sharpness and frequency-domain energy.
//!
//! Printed photos lose fine texture (low Laplacian variance), while screens
//! and halftone prints add periodic high-frequency energy (moiré). Both cues
//! are read from a single frame; the scorer keeps no memory across calls.
//!
//! # Threat Coverage
//!
//! - **Blocks:** blurry prints, screen replays with visible pixel grids.
//! - **Does not block:** high-quality 3D masks or sharp deepfake video.

use std::collections::HashMap;
use std::sync::Arc;

use image::{imageops, RgbImage};
use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::types::LandmarkFrame;

/// Fraction of the landmark box trimmed from each side to drop hair and background.
const REGION_INSET: f32 = 0.1;
/// Laplacian variance mapped to a sharpness of 1.0.
const SHARPNESS_SCALE: f64 = 100.0;
/// High-frequency energy at which the spoof score starts rising.
const ENERGY_FLOOR: f64 = 130.0;
/// Energy span from a spoof score of 0 to 1.
const ENERGY_SPAN: f64 = 100.0;
const SHARPNESS_WEIGHT: f32 = 0.4;
const FREQUENCY_WEIGHT: f32 = 0.6;

/// Per-frame passive liveness result with its components for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PassiveScore {
    /// Combined liveness score in [0, 1].
    pub score: f32,
    /// Laplacian variance mapped into [0, 1].
    pub sharpness: f32,
    /// `1 - spoof` from the spectral energy, in [0, 1].
    pub frequency_liveness: f32,
    /// Mean high-frequency log-magnitude (raw).
    pub high_freq_energy: f64,
    /// Laplacian variance (raw).
    pub laplacian_variance: f64,
}

impl PassiveScore {
    /// Result for an empty or degenerate face region.
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// Stateless per-frame scorer. Holds only a cache of FFT plans by length.
#[derive(Default)]
pub struct PassiveScorer {
    plans: HashMap<usize, Arc<dyn Fft<f64>>>,
}

impl PassiveScorer {
    pub fn new() -> Self {
        Self::default()
    }

    fn plan(&mut self, len: usize) -> Arc<dyn Fft<f64>> {
        Arc::clone(
            self.plans
                .entry(len)
                .or_insert_with(|| FftPlanner::new().plan_fft_forward(len)),
        )
    }

    /// Crop the face from `frame` and score it; neutral when the crop is empty.
    pub fn score_frame(&mut self, frame: &RgbImage, landmarks: &LandmarkFrame) -> PassiveScore {
        match face_region(frame, landmarks) {
            Some(region) => self.score_region(&region),
            None => PassiveScore::neutral(),
        }
    }

    pub fn score_region(&mut self, region: &RgbImage) -> PassiveScore {
        if region.width() == 0 || region.height() == 0 {
            return PassiveScore::neutral();
        }

        let intensity = intensity_field(region);

        let laplacian_variance = laplacian_variance(&intensity);
        let sharpness = unit(laplacian_variance / SHARPNESS_SCALE);

        let high_freq_energy = self.high_frequency_energy(&intensity);
        let spoof = unit((high_freq_energy - ENERGY_FLOOR) / ENERGY_SPAN);
        let frequency_liveness = 1.0 - spoof;

        let score = unit(f64::from(
            SHARPNESS_WEIGHT * sharpness + FREQUENCY_WEIGHT * frequency_liveness,
        ));

        PassiveScore {
            score,
            sharpness,
            frequency_liveness,
            high_freq_energy,
            laplacian_variance,
        }
    }

    /// Mean of `20·ln(|F| + 1)` over the centred spectrum, excluding a
    /// low-frequency square of half-width `min(h, w) / 4`.
    fn high_frequency_energy(&mut self, intensity: &Array2<f64>) -> f64 {
        let (h, w) = intensity.dim();

        let mut rows: Vec<Complex<f64>> = intensity.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.plan(w).process(&mut rows);

        // Column pass on a transposed copy so each column is contiguous.
        let mut columns = vec![Complex::new(0.0, 0.0); h * w];
        for y in 0..h {
            for x in 0..w {
                columns[x * h + y] = rows[y * w + x];
            }
        }
        self.plan(h).process(&mut columns);

        let (cy, cx) = (h / 2, w / 2);
        let r = h.min(w) / 4;
        let masked = |shifted: usize, centre: usize| shifted >= centre - r && shifted < centre + r;

        let mut total = 0.0;
        let mut count = 0usize;
        for y in 0..h {
            let sy = (y + h / 2) % h;
            for x in 0..w {
                let sx = (x + w / 2) % w;
                if masked(sy, cy) && masked(sx, cx) {
                    continue;
                }
                total += 20.0 * (columns[x * h + y].norm() + 1.0).ln();
                count += 1;
            }
        }

        if count == 0 {
            return 0.0;
        }
        total / count as f64
    }
}

/// Landmark bounding box shrunk by 10% per side, clamped to the frame.
pub fn face_region(frame: &RgbImage, landmarks: &LandmarkFrame) -> Option<RgbImage> {
    let (min_x, min_y, max_x, max_y) = landmarks.bounding_box();
    let (mut x0, mut y0, mut x1, mut y1) = (min_x as i64, min_y as i64, max_x as i64, max_y as i64);

    let inset_x = ((x1 - x0) as f32 * REGION_INSET) as i64;
    let inset_y = ((y1 - y0) as f32 * REGION_INSET) as i64;
    x0 += inset_x;
    x1 -= inset_x;
    y0 += inset_y;
    y1 -= inset_y;

    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(i64::from(frame.width()));
    let y1 = y1.min(i64::from(frame.height()));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(
        imageops::crop_imm(
            frame,
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        )
        .to_image(),
    )
}

/// Rec.601 luma (0.299, 0.587, 0.114) rounded to 8-bit levels.
///
/// The energy floor and span are calibrated against these levels.
fn intensity_field(rgb: &RgbImage) -> Array2<f64> {
    let (w, h) = rgb.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        let [r, g, b] = rgb.get_pixel(x as u32, y as u32).0;
        luma_601(r, g, b)
    })
}

fn luma_601(r: u8, g: u8, b: u8) -> f64 {
    (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)).round()
}

/// Variance of the 4-neighbour Laplacian with reflect-101 borders.
fn laplacian_variance(intensity: &Array2<f64>) -> f64 {
    let (h, w) = intensity.dim();
    let at = |y: isize, x: isize| intensity[(reflect_101(y, h), reflect_101(x, w))];

    let laplacian = Array2::from_shape_fn((h, w), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        at(y - 1, x) + at(y + 1, x) + at(y, x - 1) + at(y, x + 1) - 4.0 * at(y, x)
    });
    laplacian.var(0.0)
}

/// Mirror an index one step past either edge without repeating the edge sample.
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let reflected = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    reflected as usize
}

/// Clamp into [0, 1]; non-finite values count as 0.
fn unit(value: f64) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}
