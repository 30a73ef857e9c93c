//! Active liveness: a randomly issued blink/turn/look challenge.
//!
//! The subject has a fixed window to perform the requested action. Head
//! movement is judged relative to the pose captured when the challenge
//! started, so the subject's resting orientation does not matter.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::geometry::{estimate_head_pose, eye_aspect_ratio};
use crate::topology::{LEFT_EYE, RIGHT_EYE};
use crate::types::{FrameSize, HeadPose, LandmarkFrame, PoseDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Blink,
    LookLeft,
    LookRight,
    LookUp,
    LookDown,
}

impl ChallengeKind {
    pub const ALL: [ChallengeKind; 5] = [
        ChallengeKind::Blink,
        ChallengeKind::LookLeft,
        ChallengeKind::LookRight,
        ChallengeKind::LookUp,
        ChallengeKind::LookDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Blink => "blink",
            ChallengeKind::LookLeft => "look_left",
            ChallengeKind::LookRight => "look_right",
            ChallengeKind::LookUp => "look_up",
            ChallengeKind::LookDown => "look_down",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Idle,
    Active,
    Success,
    Fail,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Success | ChallengeStatus::Fail)
    }
}

/// Challenge window and pass thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChallengeConfig {
    pub duration: Duration,
    /// Blink passes when the eye aspect ratio drops below this.
    pub ear_threshold: f32,
    /// Degrees of yaw change required for a left/right turn.
    pub yaw_threshold: f32,
    /// Degrees of pitch change required for looking up/down.
    pub pitch_threshold: f32,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs_f32(7.0),
            ear_threshold: 0.18,
            yaw_threshold: 20.0,
            pitch_threshold: 15.0,
        }
    }
}

/// Source of the challenge issued at session start.
pub trait ChallengePicker: Send {
    fn pick(&mut self) -> ChallengeKind;
}

/// A fixed challenge: always issues itself.
impl ChallengePicker for ChallengeKind {
    fn pick(&mut self) -> ChallengeKind {
        *self
    }
}

impl<P: ChallengePicker + ?Sized> ChallengePicker for Box<P> {
    fn pick(&mut self) -> ChallengeKind {
        (**self).pick()
    }
}

/// Uniform choice over [`ChallengeKind::ALL`] driven by any RNG.
#[derive(Debug, Clone)]
pub struct RandomPicker<R> {
    rng: R,
}

impl<R: Rng> RandomPicker<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RandomPicker<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> ChallengePicker for RandomPicker<R> {
    fn pick(&mut self) -> ChallengeKind {
        *ChallengeKind::ALL
            .choose(&mut self.rng)
            .unwrap_or(&ChallengeKind::Blink)
    }
}

/// Challenge state machine: IDLE → ACTIVE → SUCCESS | FAIL.
///
/// SUCCESS and FAIL are terminal until [`ChallengeMachine::reset`].
pub struct ChallengeMachine<C = SystemClock, P = RandomPicker<StdRng>> {
    config: ChallengeConfig,
    clock: C,
    picker: P,
    kind: Option<ChallengeKind>,
    started_at: Duration,
    initial_pose: HeadPose,
    last_pose: HeadPose,
    status: ChallengeStatus,
}

impl<C: Clock, P: ChallengePicker> ChallengeMachine<C, P> {
    pub fn new(config: ChallengeConfig, clock: C, picker: P) -> Self {
        Self {
            config,
            clock,
            picker,
            kind: None,
            started_at: Duration::ZERO,
            initial_pose: HeadPose::default(),
            last_pose: HeadPose::default(),
            status: ChallengeStatus::Idle,
        }
    }

    /// Issue a new challenge and start its timer.
    ///
    /// The initial pose comes from `initial` when a face is present and its
    /// pose can be solved; otherwise it defaults to (0, 0, 0).
    pub fn start(&mut self, initial: Option<&LandmarkFrame>, frame: FrameSize) -> ChallengeKind {
        let kind = self.picker.pick();
        let initial_pose = match initial.map(|lm| estimate_head_pose(lm, frame)) {
            Some(Ok(pose)) => pose,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "initial pose unavailable, using neutral pose");
                HeadPose::default()
            }
            None => {
                tracing::warn!("no face at challenge start, using neutral pose");
                HeadPose::default()
            }
        };

        self.kind = Some(kind);
        self.started_at = self.clock.now();
        self.initial_pose = initial_pose;
        self.last_pose = initial_pose;
        self.status = ChallengeStatus::Active;

        tracing::debug!(
            challenge = %kind,
            pitch = initial_pose.pitch,
            yaw = initial_pose.yaw,
            "challenge started"
        );
        kind
    }

    /// Evaluate one frame against the active challenge.
    ///
    /// Always returns the current status with the pitch/yaw change from the
    /// initial pose (zero when not evaluated).
    pub fn verify(&mut self, landmarks: &LandmarkFrame, frame: FrameSize) -> (ChallengeStatus, PoseDelta) {
        let Some(kind) = self.kind.filter(|_| self.status == ChallengeStatus::Active) else {
            return (self.status, PoseDelta::default());
        };

        let elapsed = self.clock.now().saturating_sub(self.started_at);
        if elapsed > self.config.duration {
            self.status = ChallengeStatus::Fail;
            tracing::info!(challenge = %kind, elapsed_ms = elapsed.as_millis() as u64, "challenge timed out");
            return (self.status, PoseDelta::default());
        }

        let pose = match estimate_head_pose(landmarks, frame) {
            Ok(pose) => {
                self.last_pose = pose;
                pose
            }
            Err(e) => {
                tracing::debug!(error = %e, "pose estimation failed, reusing last pose");
                self.last_pose
            }
        };
        let delta = pose.delta_from(&self.initial_pose);
        let ear = eye_aspect_ratio(landmarks, &LEFT_EYE, &RIGHT_EYE);

        let c = &self.config;
        let passed = match kind {
            ChallengeKind::Blink => ear.is_some_and(|ear| ear < c.ear_threshold),
            ChallengeKind::LookLeft => delta.yaw > c.yaw_threshold,
            ChallengeKind::LookRight => delta.yaw < -c.yaw_threshold,
            ChallengeKind::LookUp => delta.pitch < -c.pitch_threshold,
            ChallengeKind::LookDown => delta.pitch > c.pitch_threshold,
        };

        if passed {
            self.status = ChallengeStatus::Success;
            tracing::info!(
                challenge = %kind,
                elapsed_ms = elapsed.as_millis() as u64,
                d_pitch = delta.pitch,
                d_yaw = delta.yaw,
                "challenge passed"
            );
        }

        (self.status, delta)
    }

    /// Return to IDLE, discarding the current challenge.
    pub fn reset(&mut self) {
        self.kind = None;
        self.status = ChallengeStatus::Idle;
    }

    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    pub fn kind(&self) -> Option<ChallengeKind> {
        self.kind
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// Time left in the window; zero when not active.
    pub fn remaining(&self) -> Duration {
        if self.status != ChallengeStatus::Active {
            return Duration::ZERO;
        }
        let elapsed = self.clock.now().saturating_sub(self.started_at);
        self.config.duration.saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fixtures::{FaceFixture, FRAME};
    use crate::topology::MESH_LANDMARK_COUNT;
    use nalgebra::Point3;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn machine(kind: ChallengeKind) -> (ChallengeMachine<Arc<ManualClock>, ChallengeKind>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let m = ChallengeMachine::new(ChallengeConfig::default(), Arc::clone(&clock), kind);
        (m, clock)
    }

    fn started(kind: ChallengeKind) -> (ChallengeMachine<Arc<ManualClock>, ChallengeKind>, Arc<ManualClock>) {
        let (mut m, clock) = machine(kind);
        assert_eq!(m.start(Some(&FaceFixture::frontal().landmarks()), FRAME), kind);
        (m, clock)
    }

    fn feed(m: &mut ChallengeMachine<Arc<ManualClock>, ChallengeKind>, face: FaceFixture) -> (ChallengeStatus, PoseDelta) {
        m.verify(&face.landmarks(), FRAME)
    }

    #[test]
    fn test_idle_until_started() {
        let (mut m, _) = machine(ChallengeKind::Blink);
        let (status, delta) = feed(&mut m, FaceFixture::frontal().eyes_closed());
        assert_eq!(status, ChallengeStatus::Idle);
        assert_eq!(delta, PoseDelta::default());
        assert_eq!(m.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_blink_passes_before_turn_threshold() {
        let (mut m, clock) = started(ChallengeKind::Blink);

        let (status, delta) = feed(&mut m, FaceFixture::frontal().turned(10.0));
        assert_eq!(status, ChallengeStatus::Active);
        assert!((delta.yaw - 10.0).abs() < 0.5);

        clock.advance(Duration::from_millis(400));
        let (status, _) = feed(&mut m, FaceFixture::frontal().turned(12.0).eyes_closed());
        assert_eq!(status, ChallengeStatus::Success);

        // Terminal: a later turn past the look-left threshold changes nothing.
        let (status, delta) = feed(&mut m, FaceFixture::frontal().turned(30.0));
        assert_eq!(status, ChallengeStatus::Success);
        assert_eq!(delta, PoseDelta::default());
    }

    #[test]
    fn test_turns_pass_in_their_direction_only() {
        let (mut m, _) = started(ChallengeKind::LookLeft);
        assert_eq!(feed(&mut m, FaceFixture::frontal().turned(-30.0)).0, ChallengeStatus::Active);
        assert_eq!(feed(&mut m, FaceFixture::frontal().turned(15.0)).0, ChallengeStatus::Active);
        assert_eq!(feed(&mut m, FaceFixture::frontal().turned(25.0)).0, ChallengeStatus::Success);

        let (mut m, _) = started(ChallengeKind::LookRight);
        assert_eq!(feed(&mut m, FaceFixture::frontal().turned(25.0)).0, ChallengeStatus::Active);
        let (status, delta) = feed(&mut m, FaceFixture::frontal().turned(-25.0));
        assert_eq!(status, ChallengeStatus::Success);
        assert!((delta.yaw + 25.0).abs() < 0.5);
    }

    #[test]
    fn test_look_up_and_down_use_wrapped_pitch() {
        let (mut m, _) = started(ChallengeKind::LookUp);
        assert_eq!(feed(&mut m, FaceFixture::frontal().tilted(10.0)).0, ChallengeStatus::Active);
        let (status, delta) = feed(&mut m, FaceFixture::frontal().tilted(-20.0));
        assert_eq!(status, ChallengeStatus::Success);
        assert!((delta.pitch + 20.0).abs() < 0.5, "d_pitch {}", delta.pitch);

        let (mut m, _) = started(ChallengeKind::LookDown);
        assert_eq!(feed(&mut m, FaceFixture::frontal().tilted(-20.0)).0, ChallengeStatus::Active);
        let (status, delta) = feed(&mut m, FaceFixture::frontal().tilted(20.0));
        assert_eq!(status, ChallengeStatus::Success);
        assert!((delta.pitch - 20.0).abs() < 0.5, "d_pitch {}", delta.pitch);
    }

    #[test]
    fn test_deltas_relative_to_initial_pose() {
        let clock = Arc::new(ManualClock::new());
        let mut m = ChallengeMachine::new(ChallengeConfig::default(), Arc::clone(&clock), ChallengeKind::LookLeft);
        m.start(Some(&FaceFixture::frontal().turned(-15.0).landmarks()), FRAME);

        // Absolute yaw 10 is only +25 relative to the starting -15.
        let (status, delta) = m.verify(&FaceFixture::frontal().turned(10.0).landmarks(), FRAME);
        assert_eq!(status, ChallengeStatus::Success);
        assert!((delta.yaw - 25.0).abs() < 0.5);
    }

    #[test]
    fn test_timeout_fails() {
        let (mut m, clock) = started(ChallengeKind::LookLeft);
        clock.advance(Duration::from_secs(7));
        assert_eq!(feed(&mut m, FaceFixture::frontal()).0, ChallengeStatus::Active);

        clock.advance(Duration::from_millis(1));
        let (status, delta) = feed(&mut m, FaceFixture::frontal().turned(40.0));
        assert_eq!(status, ChallengeStatus::Fail);
        assert_eq!(delta, PoseDelta::default());
        assert_eq!(feed(&mut m, FaceFixture::frontal().turned(40.0)).0, ChallengeStatus::Fail);
    }

    #[test]
    fn test_remaining_counts_down() {
        let (m, clock) = started(ChallengeKind::Blink);
        clock.advance(Duration::from_secs(2));
        assert_eq!(m.remaining(), Duration::from_secs(5));
        clock.advance(Duration::from_secs(10));
        assert_eq!(m.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_pose_failure_reuses_last_pose() {
        let (mut m, _) = started(ChallengeKind::LookLeft);
        let (_, delta) = feed(&mut m, FaceFixture::frontal().turned(10.0));
        assert!((delta.yaw - 10.0).abs() < 0.5);

        let collapsed = LandmarkFrame::new(vec![Point3::new(1.0, 1.0, 0.0); MESH_LANDMARK_COUNT]).unwrap();
        let (status, delta) = m.verify(&collapsed, FRAME);
        assert_eq!(status, ChallengeStatus::Active);
        assert!((delta.yaw - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_start_without_face_uses_neutral_pose() {
        let (mut m, _) = machine(ChallengeKind::LookLeft);
        m.start(None, FRAME);
        // Frontal fixture sits at yaw 0, so yaw deltas are still meaningful.
        let (status, delta) = feed(&mut m, FaceFixture::frontal().turned(5.0));
        assert_eq!(status, ChallengeStatus::Active);
        assert!((delta.yaw - 5.0).abs() < 0.5);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (mut m, _) = started(ChallengeKind::Blink);
        feed(&mut m, FaceFixture::frontal().eyes_closed());
        assert_eq!(m.status(), ChallengeStatus::Success);
        m.reset();
        assert_eq!(m.status(), ChallengeStatus::Idle);
        assert_eq!(m.kind(), None);
    }

    #[test]
    fn test_random_picker_is_seedable_and_uniform_support() {
        let a: Vec<_> = {
            let mut p = RandomPicker::seeded(42);
            (0..20).map(|_| p.pick()).collect()
        };
        let b: Vec<_> = {
            let mut p = RandomPicker::seeded(42);
            (0..20).map(|_| p.pick()).collect()
        };
        assert_eq!(a, b);

        let mut p = RandomPicker::seeded(7);
        let seen: HashSet<_> = (0..500).map(|_| p.pick()).collect();
        assert_eq!(seen.len(), ChallengeKind::ALL.len());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(ChallengeKind::LookLeft.to_string(), "look_left");
        assert_eq!(serde_json::to_string(&ChallengeKind::LookDown).unwrap(), "\"look_down\"");
        assert_eq!(serde_json::to_string(&ChallengeStatus::Success).unwrap(), "\"SUCCESS\"");
    }
}
