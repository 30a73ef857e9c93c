use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use livegate_core::Frame;

use crate::slot::FrameSlot;
use crate::{CaptureError, FrameSource};

/// Give up after this many source errors in a row.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Producer thread feeding a [`FrameSlot`].
///
/// The slot is closed when the source ends, fails repeatedly, or the worker
/// is stopped. Dropping the worker stops it and joins the thread.
pub struct CaptureWorker {
    slot: Arc<FrameSlot>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn<S>(mut source: S, slot: Arc<FrameSlot>) -> Result<Self, CaptureError>
    where
        S: FrameSource + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let slot = Arc::clone(&slot);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("livegate-capture".into())
                .spawn(move || {
                    tracing::info!("capture thread started");
                    let published = run_capture(&mut source, &slot, &shutdown);
                    slot.close();
                    tracing::info!(published, "capture thread exiting");
                })
                .map_err(CaptureError::Spawn)?
        };

        Ok(Self {
            slot,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request shutdown and wait for the thread to exit.
    ///
    /// A source blocked in `next_image` is waited for.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
                self.slot.close();
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run_capture<S: FrameSource>(source: &mut S, slot: &FrameSlot, shutdown: &AtomicBool) -> u64 {
    let started = Instant::now();
    let mut seq = 0u64;
    let mut consecutive_errors = 0u32;

    while !shutdown.load(Ordering::Relaxed) {
        match source.next_image() {
            Ok(Some(image)) => {
                consecutive_errors = 0;
                slot.publish(Frame {
                    seq,
                    captured_at: started.elapsed(),
                    image,
                });
                seq += 1;
            }
            Ok(None) => {
                tracing::debug!(frames = seq, "frame source exhausted");
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(error = %e, consecutive_errors, "frame capture failed");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!("too many capture failures, stopping");
                    break;
                }
            }
        }
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Duration;

    #[test]
    fn test_worker_publishes_then_closes() {
        let slot = Arc::new(FrameSlot::new());
        let mut remaining = 3u32;
        let source = move || -> Result<Option<RgbImage>, CaptureError> {
            if remaining == 0 {
                return Ok(None);
            }
            remaining -= 1;
            Ok(Some(RgbImage::new(8, 8)))
        };

        let worker = CaptureWorker::spawn(source, Arc::clone(&slot)).unwrap();
        while !slot.is_closed() {
            slot.wait_newer(None, Duration::from_millis(50));
        }
        worker.stop();

        assert_eq!(slot.latest().map(|f| f.seq), Some(2));
    }

    #[test]
    fn test_worker_gives_up_after_repeated_errors() {
        let slot = Arc::new(FrameSlot::new());
        let source = || -> Result<Option<RgbImage>, CaptureError> {
            Err(CaptureError::Io(std::io::Error::other("device gone")))
        };

        let worker = CaptureWorker::spawn(source, Arc::clone(&slot)).unwrap();
        assert!(slot.wait_newer(None, Duration::from_secs(5)).is_none());
        assert!(slot.is_closed());
        drop(worker);
    }

    #[test]
    fn test_stop_ends_endless_source() {
        let slot = Arc::new(FrameSlot::new());
        let source = || -> Result<Option<RgbImage>, CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(Some(RgbImage::new(2, 2)))
        };

        let worker = CaptureWorker::spawn(source, Arc::clone(&slot)).unwrap();
        let first = slot.wait_newer(None, Duration::from_secs(5)).unwrap();
        let later = slot.wait_newer(Some(first.seq), Duration::from_secs(5)).unwrap();
        assert!(later.seq > first.seq);
        assert!(later.captured_at >= first.captured_at);

        worker.stop();
        assert!(slot.is_closed());
    }
}
