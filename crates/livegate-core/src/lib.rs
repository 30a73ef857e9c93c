//! livegate-core — liveness and recognition decision pipeline.
//!
//! Combines a passive texture/frequency spoof score with an active
//! challenge-response check, then enrolls or matches a geometric landmark
//! signature. Face detection, camera access and persistence are external
//! collaborators reached through the traits in [`provider`], [`store`] and
//! [`clock`].

pub mod challenge;
pub mod clock;
pub mod geometry;
pub mod matcher;
pub mod passive;
pub mod provider;
pub mod session;
pub mod signature;
pub mod store;
pub mod topology;
pub mod types;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use challenge::{
    ChallengeConfig, ChallengeKind, ChallengeMachine, ChallengePicker, ChallengeStatus,
    RandomPicker,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use matcher::{MatchError, MatchResult};
pub use passive::PassiveScore;
pub use provider::LandmarkProvider;
pub use session::{
    FrameReport, SessionConfig, SessionError, SessionMode, SessionOrchestrator, TerminalOutcome,
};
pub use store::{MemoryUserStore, StoreError, UserStore};
pub use types::{
    Frame, FrameSize, HeadPose, LandmarkError, LandmarkFrame, PoseDelta, Signature, UserRecord,
};
