//! Face-mesh landmark topology contract.
//!
//! Indices refer to the 468-point MediaPipe face mesh (the 478-point refined
//! variant appends iris points and keeps these indices). A substituted
//! landmark provider must emit the same layout.

/// Minimum number of points in a [`crate::LandmarkFrame`].
pub const MESH_LANDMARK_COUNT: usize = 468;

pub const NOSE_TIP: usize = 1;
pub const CHIN: usize = 152;
/// Outer corner of the eye on the image-left side.
pub const LEFT_EYE_OUTER: usize = 33;
/// Outer corner of the eye on the image-right side.
pub const RIGHT_EYE_OUTER: usize = 263;
pub const MOUTH_LEFT: usize = 61;
pub const MOUTH_RIGHT: usize = 291;

/// Eye contours in `p0..p5` order: p0/p3 horizontal corners, p1/p5 and p2/p4
/// vertical pairs.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// Landmarks paired with [`HEAD_MODEL_POINTS`] for pose estimation.
pub const POSE_LANDMARKS: [usize; 6] = [
    NOSE_TIP,
    CHIN,
    LEFT_EYE_OUTER,
    RIGHT_EYE_OUTER,
    MOUTH_LEFT,
    MOUTH_RIGHT,
];

/// Generic 3D head model (arbitrary units, y up) for the pose landmarks.
pub const HEAD_MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],          // nose tip
    [0.0, -330.0, -65.0],     // chin
    [-225.0, 170.0, -135.0],  // left eye left corner
    [225.0, 170.0, -135.0],   // right eye right corner
    [-150.0, -150.0, -125.0], // left mouth corner
    [150.0, -150.0, -125.0],  // right mouth corner
];

/// Ordered landmark subset flattened into a signature.
#[rustfmt::skip]
pub const SIGNATURE_LANDMARKS: [usize; 40] = [
    // nose, chin, eye corners, mouth corners
    1, 4, 152, 33, 263, 61, 291,
    // midline
    10, 151, 9, 8, 168, 6, 197, 195, 5, 4,
    // left eye contour
    362, 385, 387, 263, 373, 380,
    // right eye contour
    33, 160, 158, 133, 153, 144,
    // mouth
    61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291,
];

/// Length of every [`crate::Signature`].
pub const SIGNATURE_LEN: usize = SIGNATURE_LANDMARKS.len() * 3;
