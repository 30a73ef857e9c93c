//! livegate-capture — frame acquisition decoupled from frame processing.
//!
//! A [`CaptureWorker`] pulls images from a [`FrameSource`] on its own thread
//! and publishes them into a [`FrameSlot`]. The slot only ever holds the most
//! recent frame: a slow consumer skips frames rather than queueing them.

pub mod sequence;
pub mod slot;
pub mod worker;

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

pub use sequence::ImageSequenceSource;
pub use slot::FrameSlot;
pub use worker::CaptureWorker;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no images found in {0}")]
    Empty(PathBuf),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// A producer of camera images.
///
/// `Ok(None)` signals the end of the stream. Implementations may block
/// until the next image is available.
pub trait FrameSource: Send {
    fn next_image(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Result<Option<RgbImage>, CaptureError> + Send,
{
    fn next_image(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        self()
    }
}
