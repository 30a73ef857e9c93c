//! Recorded-session replay.
//!
//! A recording is a directory holding `recording.json` and the frame images
//! it references. Each frame carries its capture time and the landmarks a
//! face-mesh model produced for it (or `null` when no face was found):
//!
//! ```json
//! {
//!   "challenge": "blink",
//!   "start_frame": 0,
//!   "frames": [
//!     { "t": 0.000, "image": "frames/0000.png", "landmarks": [[x, y, z], ...] },
//!     { "t": 0.033, "image": "frames/0001.png", "landmarks": null }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use livegate_core::{
    ChallengeKind, ChallengePicker, Frame, FrameReport, FrameSize, LandmarkFrame,
    LandmarkProvider, ManualClock, RandomPicker, SessionMode, SessionOrchestrator,
    TerminalOutcome, UserStore,
};
use serde::Deserialize;

pub const MANIFEST: &str = "recording.json";

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    /// Seconds since the start of the recording.
    pub t: f64,
    /// Image path relative to the recording directory.
    pub image: PathBuf,
    #[serde(default)]
    pub landmarks: Option<Vec<[f32; 3]>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    pub frames: Vec<RecordedFrame>,
    /// Frame on which the session start was requested.
    #[serde(default)]
    pub start_frame: usize,
    /// Challenge the subject performed; a random one is issued when absent.
    #[serde(default)]
    pub challenge: Option<ChallengeKind>,
    #[serde(skip)]
    dir: PathBuf,
}

impl Recording {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = dir.join(MANIFEST);
        let text = std::fs::read_to_string(&manifest)
            .with_context(|| format!("failed to read {}", manifest.display()))?;
        let mut recording: Recording = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", manifest.display()))?;

        if recording.frames.is_empty() {
            bail!("{} contains no frames", manifest.display());
        }
        if recording.start_frame >= recording.frames.len() {
            bail!(
                "start_frame {} is past the last frame ({})",
                recording.start_frame,
                recording.frames.len() - 1
            );
        }
        if recording.frames.windows(2).any(|w| w[1].t < w[0].t) {
            bail!("frame timestamps in {} are not monotonic", manifest.display());
        }

        recording.dir = dir.to_path_buf();
        Ok(recording)
    }

    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        self.frames.get(index).map(|f| self.dir.join(&f.image))
    }

    pub fn image_paths(&self) -> Vec<PathBuf> {
        self.frames.iter().map(|f| self.dir.join(&f.image)).collect()
    }

    pub fn load_image(&self, index: usize) -> Result<RgbImage> {
        let path = self
            .image_path(index)
            .with_context(|| format!("no frame {index}"))?;
        Ok(image::open(&path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8())
    }

    /// Mean spacing between frames, for paced playback.
    pub fn frame_interval(&self) -> Duration {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) if self.frames.len() > 1 => {
                let gaps = (self.frames.len() - 1) as f64;
                Duration::from_secs_f64(((last.t - first.t) / gaps).max(0.0))
            }
            _ => Duration::ZERO,
        }
    }

    /// Picker that reissues the recorded challenge, or a random one.
    pub fn picker(&self) -> Box<dyn ChallengePicker> {
        match self.challenge {
            Some(kind) => Box::new(kind),
            None => Box::new(RandomPicker::from_entropy()),
        }
    }

    /// Validated landmarks for every frame, indexed like `frames`.
    pub fn landmarks(&self) -> Result<RecordedLandmarks> {
        let frames = self
            .frames
            .iter()
            .enumerate()
            .map(|(i, f)| {
                f.landmarks
                    .as_deref()
                    .map(LandmarkFrame::from_rows)
                    .transpose()
                    .with_context(|| format!("invalid landmarks on frame {i}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordedLandmarks { frames })
    }
}

/// Landmark provider answering from a recording, keyed by frame sequence.
#[derive(Debug, Clone)]
pub struct RecordedLandmarks {
    frames: Vec<Option<LandmarkFrame>>,
}

impl RecordedLandmarks {
    pub fn get(&self, index: usize) -> Option<&LandmarkFrame> {
        self.frames.get(index).and_then(Option::as_ref)
    }
}

impl LandmarkProvider for RecordedLandmarks {
    fn detect(&mut self, frame: &Frame) -> Option<LandmarkFrame> {
        usize::try_from(frame.seq)
            .ok()
            .and_then(|i| self.get(i))
            .cloned()
    }
}

/// Replay `recording` frame by frame on recorded time.
///
/// Frames before `start_frame` are scored passively only. `on_frame` sees
/// every report. Returns `None` when the recording ends before the session
/// resolves.
pub fn replay_serial<S, P>(
    recording: &Recording,
    orchestrator: &mut SessionOrchestrator<S, Arc<ManualClock>, P>,
    clock: &ManualClock,
    mode: SessionMode,
    mut on_frame: impl FnMut(usize, &FrameReport),
) -> Result<Option<TerminalOutcome>>
where
    S: UserStore,
    P: ChallengePicker,
{
    let landmarks = recording.landmarks()?;

    for (index, frame) in recording.frames.iter().enumerate() {
        clock.set(Duration::from_secs_f64(frame.t.max(0.0)));
        let image = recording.load_image(index)?;
        let face = landmarks.get(index);

        if index == recording.start_frame {
            let challenge = orchestrator.start_session(mode.clone(), face, FrameSize::of(&image))?;
            tracing::info!(frame = index, %challenge, "replay: session started");
        }

        let Some(face) = face else {
            tracing::debug!(frame = index, "replay: no face");
            continue;
        };
        let report = orchestrator.process_frame(&image, face)?;
        on_frame(index, &report);
        if let Some(outcome) = report.outcome {
            return Ok(Some(outcome));
        }
    }

    orchestrator.cancel();
    Ok(None)
}
