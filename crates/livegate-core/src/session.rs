//! Register/login session lifecycle.
//!
//! A [`SessionOrchestrator`] owns everything one authentication attempt
//! needs: the passive score history, the candidate signatures and the
//! challenge state machine. Feed it one frame at a time; when the challenge
//! reaches a terminal state the session is resolved and the orchestrator
//! returns to idle.

use std::collections::VecDeque;
use std::fmt;

use image::RgbImage;
use rand::rngs::StdRng;
use serde::Serialize;
use thiserror::Error;

use crate::challenge::{
    ChallengeConfig, ChallengeKind, ChallengeMachine, ChallengePicker, ChallengeStatus, RandomPicker,
};
use crate::clock::{Clock, SystemClock};
use crate::matcher::best_match;
use crate::passive::{PassiveScore, PassiveScorer};
use crate::signature::{extract_signature, pose_score};
use crate::store::{validate_name, StoreError, UserStore};
use crate::types::{FrameSize, LandmarkFrame, PoseDelta, Signature};

/// Passive scores kept while no session is running.
const IDLE_HISTORY_LEN: usize = 300;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyActive,

    #[error("registration requires a non-empty user name")]
    InvalidName,

    #[error("no signature was captured during the session")]
    NoSignature,

    #[error("user store failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionMode {
    Register { name: String },
    Login,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Register { name } => write!(f, "register({name})"),
            SessionMode::Login => f.write_str("login"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub challenge: ChallengeConfig,
    /// Mean passive score must exceed this for a successful challenge to count.
    pub min_passive_score: f32,
    /// Login accepts the best match only above this similarity.
    pub match_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge: ChallengeConfig::default(),
            min_passive_score: 0.4,
            match_threshold: 0.70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    Registered { name: String },
    LoginSuccess { name: String, similarity: f32 },
    LoginUnknown { similarity: f32 },
    RejectedTextureSpoof { passive_mean: f32 },
    RejectedActionSpoof,
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalOutcome::Registered { name } => write!(f, "REGISTERED({name})"),
            TerminalOutcome::LoginSuccess { name, similarity } => {
                write!(f, "LOGIN_SUCCESS({name}, similarity {similarity:.2})")
            }
            TerminalOutcome::LoginUnknown { similarity } => {
                write!(f, "LOGIN_UNKNOWN(best similarity {similarity:.2})")
            }
            TerminalOutcome::RejectedTextureSpoof { passive_mean } => {
                write!(f, "REJECTED_TEXTURE_SPOOF(passive {passive_mean:.2})")
            }
            TerminalOutcome::RejectedActionSpoof => f.write_str("REJECTED_ACTION_SPOOF"),
        }
    }
}

/// What one processed frame produced, for live feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub passive: PassiveScore,
    pub status: ChallengeStatus,
    pub deltas: PoseDelta,
    /// Challenge being performed; `None` while idle.
    pub challenge: Option<ChallengeKind>,
    /// Seconds left in the challenge window, 0 while idle.
    pub remaining_secs: f32,
    /// Set on the frame that resolved the session.
    pub outcome: Option<TerminalOutcome>,
}

/// Candidate signatures gathered during one session, keyed by pose score.
#[derive(Debug, Default)]
pub struct SignatureBuffer {
    candidates: Vec<(f32, Signature)>,
}

impl SignatureBuffer {
    pub fn push(&mut self, pose_score: f32, signature: Signature) {
        self.candidates.push((pose_score, signature));
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Drain the buffer and return the most frontal signature.
    ///
    /// Ties go to the earliest candidate.
    pub fn take_best(&mut self) -> Option<Signature> {
        let mut candidates = std::mem::take(&mut self.candidates);
        // Stable sort keeps insertion order among equal scores.
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.into_iter().next().map(|(_, signature)| signature)
    }
}

pub struct SessionOrchestrator<S, C = SystemClock, P = RandomPicker<StdRng>> {
    config: SessionConfig,
    store: S,
    scorer: PassiveScorer,
    challenge: ChallengeMachine<C, P>,
    mode: Option<SessionMode>,
    passive_history: VecDeque<f32>,
    candidates: SignatureBuffer,
}

impl<S: UserStore> SessionOrchestrator<S> {
    /// Orchestrator on wall-clock time with randomly chosen challenges.
    pub fn new(config: SessionConfig, store: S) -> Self {
        Self::with_parts(config, store, SystemClock::new(), RandomPicker::from_entropy())
    }
}

impl<S: UserStore, C: Clock, P: ChallengePicker> SessionOrchestrator<S, C, P> {
    pub fn with_parts(config: SessionConfig, store: S, clock: C, picker: P) -> Self {
        Self {
            challenge: ChallengeMachine::new(config.challenge, clock, picker),
            config,
            store,
            scorer: PassiveScorer::new(),
            mode: None,
            passive_history: VecDeque::new(),
            candidates: SignatureBuffer::default(),
        }
    }

    /// Begin a register or login attempt.
    ///
    /// `landmarks` are those of the frame in which the request was made and
    /// seed the challenge's initial pose; pass `None` when no face is visible.
    pub fn start_session(
        &mut self,
        mode: SessionMode,
        landmarks: Option<&LandmarkFrame>,
        frame: FrameSize,
    ) -> Result<ChallengeKind, SessionError> {
        if self.mode.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let mode = match mode {
            SessionMode::Register { name } => {
                let name = validate_name(&name).map_err(|_| SessionError::InvalidName)?;
                SessionMode::Register {
                    name: name.to_string(),
                }
            }
            SessionMode::Login => SessionMode::Login,
        };

        self.passive_history.clear();
        self.candidates.clear();
        let kind = self.challenge.start(landmarks, frame);

        tracing::info!(
            mode = %mode,
            challenge = %kind,
            face_present = landmarks.is_some(),
            "session started"
        );
        self.mode = Some(mode);
        Ok(kind)
    }

    /// Score `image` passively and advance the session with `landmarks`.
    pub fn process_frame(
        &mut self,
        image: &RgbImage,
        landmarks: &LandmarkFrame,
    ) -> Result<FrameReport, SessionError> {
        let passive = self.scorer.score_frame(image, landmarks);
        self.process_scored(passive, landmarks, FrameSize::of(image))
    }

    /// Advance the session with an already computed passive score.
    ///
    /// Store failures end the session before they are returned.
    pub fn process_scored(
        &mut self,
        passive: PassiveScore,
        landmarks: &LandmarkFrame,
        frame: FrameSize,
    ) -> Result<FrameReport, SessionError> {
        self.passive_history.push_back(passive.score);

        if self.mode.is_none() {
            while self.passive_history.len() > IDLE_HISTORY_LEN {
                self.passive_history.pop_front();
            }
            return Ok(FrameReport {
                passive,
                status: ChallengeStatus::Idle,
                deltas: PoseDelta::default(),
                challenge: None,
                remaining_secs: 0.0,
                outcome: None,
            });
        }

        self.candidates
            .push(pose_score(landmarks), extract_signature(landmarks));
        let challenge = self.challenge.kind();
        let (status, deltas) = self.challenge.verify(landmarks, frame);
        let remaining_secs = self.challenge.remaining().as_secs_f32();

        tracing::debug!(
            passive = passive.score,
            status = ?status,
            d_pitch = deltas.pitch,
            d_yaw = deltas.yaw,
            "frame processed"
        );

        let outcome = match status {
            ChallengeStatus::Success => Some(self.resolve_success()?),
            ChallengeStatus::Fail => {
                self.end_session();
                Some(TerminalOutcome::RejectedActionSpoof)
            }
            ChallengeStatus::Idle | ChallengeStatus::Active => None,
        };

        if let Some(outcome) = &outcome {
            tracing::info!(%outcome, "session resolved");
        }

        Ok(FrameReport {
            passive,
            status,
            deltas,
            challenge,
            remaining_secs,
            outcome,
        })
    }

    fn resolve_success(&mut self) -> Result<TerminalOutcome, SessionError> {
        let passive_mean = self.passive_mean();
        let best = self.candidates.take_best();
        let Some(mode) = self.end_session() else {
            return Err(SessionError::NoSignature);
        };

        let min = self.config.min_passive_score;
        // A NaN on either side rejects.
        if passive_mean.is_nan() || min.is_nan() || passive_mean <= min {
            tracing::warn!(
                passive_mean,
                min,
                "challenge passed but texture looks spoofed"
            );
            return Ok(TerminalOutcome::RejectedTextureSpoof { passive_mean });
        }

        let signature = best.ok_or(SessionError::NoSignature)?;
        match mode {
            SessionMode::Register { name } => {
                self.store.register(&name, signature)?;
                Ok(TerminalOutcome::Registered { name })
            }
            SessionMode::Login => {
                let users = self.store.get_all()?;
                let result = best_match(&signature, &users, self.config.match_threshold);
                tracing::debug!(users = users.len(), similarity = result.similarity, "login matched");
                Ok(match result.name {
                    Some(name) if result.matched => TerminalOutcome::LoginSuccess {
                        name,
                        similarity: result.similarity,
                    },
                    _ => TerminalOutcome::LoginUnknown {
                        similarity: result.similarity,
                    },
                })
            }
        }
    }

    fn end_session(&mut self) -> Option<SessionMode> {
        self.challenge.reset();
        self.candidates.clear();
        self.mode.take()
    }

    /// Abandon the active session without an outcome.
    ///
    /// Returns `false` when no session was active.
    pub fn cancel(&mut self) -> bool {
        match self.end_session() {
            Some(mode) => {
                tracing::info!(mode = %mode, "session cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<&SessionMode> {
        self.mode.as_ref()
    }

    pub fn challenge_kind(&self) -> Option<ChallengeKind> {
        self.challenge.kind()
    }

    /// Time left to complete the active challenge.
    pub fn remaining(&self) -> std::time::Duration {
        self.challenge.remaining()
    }

    /// Mean of the passive history, 0 when empty.
    pub fn passive_mean(&self) -> f32 {
        if self.passive_history.is_empty() {
            return 0.0;
        }
        self.passive_history.iter().sum::<f32>() / self.passive_history.len() as f32
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
