use crate::types::{Frame, LandmarkFrame};

/// Per-frame face localization and dense landmark production.
///
/// Implementations return `None` when no face is found. Landmarks must follow
/// the face-mesh topology in [`crate::topology`], with x/y in pixels of the
/// given frame and z as relative depth.
pub trait LandmarkProvider: Send {
    fn detect(&mut self, frame: &Frame) -> Option<LandmarkFrame>;
}

impl<F> LandmarkProvider for F
where
    F: FnMut(&Frame) -> Option<LandmarkFrame> + Send,
{
    fn detect(&mut self, frame: &Frame) -> Option<LandmarkFrame> {
        self(frame)
    }
}
