use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use livegate_core::Frame;

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<Frame>>,
    closed: bool,
}

/// Single-frame hand-off between a capture thread and the decision thread.
///
/// Publishing replaces whatever frame was there; readers always see the most
/// recent complete frame.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Slot state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame and wake any waiting reader.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if let Some(previous) = state.latest.as_ref() {
            if previous.seq + 1 < frame.seq {
                tracing::trace!(last = previous.seq, next = frame.seq, "frames skipped");
            }
        }
        state.latest = Some(Arc::new(frame));
        drop(state);
        self.ready.notify_all();
    }

    /// The most recent frame, if any has been published.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().latest.clone()
    }

    /// Block until a frame newer than `after` is available.
    ///
    /// Returns `None` on timeout, or when the slot is closed without a newer
    /// frame.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration) -> Option<Arc<Frame>> {
        let is_newer = |state: &SlotState| {
            state
                .latest
                .as_ref()
                .is_some_and(|f| after.map_or(true, |seq| f.seq > seq))
        };

        let guard = self.lock();
        let (state, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |state| !state.closed && !is_newer(state))
            .unwrap_or_else(PoisonError::into_inner);

        if is_newer(&state) {
            state.latest.clone()
        } else {
            None
        }
    }

    /// Mark the stream finished. Later publishes are ignored.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::thread;

    fn frame(seq: u64) -> Frame {
        Frame {
            seq,
            captured_at: Duration::from_millis(seq * 33),
            image: RgbImage::new(4, 4),
        }
    }

    #[test]
    fn test_publish_replaces_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(frame(0));
        slot.publish(frame(1));
        slot.publish(frame(5));
        assert_eq!(slot.latest().map(|f| f.seq), Some(5));
    }

    #[test]
    fn test_wait_newer_returns_immediately_when_available() {
        let slot = FrameSlot::new();
        slot.publish(frame(3));
        let got = slot.wait_newer(Some(2), Duration::from_millis(1));
        assert_eq!(got.map(|f| f.seq), Some(3));
        let got = slot.wait_newer(None, Duration::from_millis(1));
        assert_eq!(got.map(|f| f.seq), Some(3));
    }

    #[test]
    fn test_wait_newer_times_out() {
        let slot = FrameSlot::new();
        slot.publish(frame(3));
        assert!(slot.wait_newer(Some(3), Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_wait_newer_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.publish(frame(1));
            })
        };

        let got = slot.wait_newer(None, Duration::from_secs(5));
        assert_eq!(got.map(|f| f.seq), Some(1));
        producer.join().unwrap();
    }

    #[test]
    fn test_close_wakes_waiter_and_ignores_publish() {
        let slot = Arc::new(FrameSlot::new());
        let closer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.close();
            })
        };

        assert!(slot.wait_newer(None, Duration::from_secs(5)).is_none());
        closer.join().unwrap();

        assert!(slot.is_closed());
        slot.publish(frame(9));
        assert!(slot.latest().is_none());
    }
}
