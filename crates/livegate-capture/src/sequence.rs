use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::{CaptureError, FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays image files in order, optionally paced to a fixed interval.
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    interval: Option<Duration>,
    last_emit: Option<Instant>,
}

impl ImageSequenceSource {
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
            interval: None,
            last_emit: None,
        }
    }

    /// All image files directly inside `dir`, in file-name order.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(CaptureError::Empty(dir.to_path_buf()));
        }
        paths.sort();
        tracing::debug!(dir = %dir.display(), count = paths.len(), "image sequence loaded");
        Ok(Self::from_paths(paths))
    }

    /// Emit at most one image per `interval`, like a camera at a fixed rate.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_image(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };

        if let (Some(interval), Some(last)) = (self.interval, self.last_emit) {
            let due = last + interval;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let image = image::open(&path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        self.last_emit = Some(Instant::now());
        Ok(Some(image))
    }
}
