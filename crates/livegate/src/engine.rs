use std::sync::Arc;
use std::time::{Duration, Instant};

use livegate_capture::FrameSlot;
use livegate_core::{
    ChallengeKind, ChallengePicker, Clock, FrameReport, LandmarkProvider, SessionError,
    SessionMode, SessionOrchestrator, TerminalOutcome, UserStore,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// How long a single wait on the frame slot may block.
const FRAME_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("no frame arrived before the session could start")]
    NoFrames,
    #[error("frame source ended before the session resolved")]
    SourceClosed,
    #[error("session did not resolve within {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of one resolved session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub challenge: ChallengeKind,
    pub outcome: TerminalOutcome,
    /// Frames with a face that were fed to the session.
    pub frames: usize,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Authenticate {
        mode: SessionMode,
        progress: Option<mpsc::UnboundedSender<FrameReport>>,
        reply: oneshot::Sender<Result<SessionSummary, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one register/login session against the live frame stream.
    ///
    /// Per-frame reports are forwarded to `progress` when given.
    pub async fn authenticate(
        &self,
        mode: SessionMode,
        progress: Option<mpsc::UnboundedSender<FrameReport>>,
    ) -> Result<SessionSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Authenticate {
                mode,
                progress,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the decision engine on a dedicated OS thread.
///
/// The thread owns the orchestrator and the landmark provider and reads the
/// most recent frame from `slot`. Sessions are run one at a time in request
/// order.
pub fn spawn_engine<S, C, P, L>(
    mut orchestrator: SessionOrchestrator<S, C, P>,
    mut provider: L,
    slot: Arc<FrameSlot>,
    result_timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    S: UserStore + 'static,
    C: Clock + 'static,
    P: ChallengePicker + 'static,
    L: LandmarkProvider + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("livegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Authenticate {
                        mode,
                        progress,
                        reply,
                    } => {
                        let result = run_session(
                            &mut orchestrator,
                            &mut provider,
                            &slot,
                            mode,
                            progress.as_ref(),
                            result_timeout,
                        );
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "session failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Start a session on the newest frame, then feed frames until it resolves.
fn run_session<S, C, P, L>(
    orchestrator: &mut SessionOrchestrator<S, C, P>,
    provider: &mut L,
    slot: &FrameSlot,
    mode: SessionMode,
    progress: Option<&mpsc::UnboundedSender<FrameReport>>,
    result_timeout: Duration,
) -> Result<SessionSummary, EngineError>
where
    S: UserStore,
    C: Clock,
    P: ChallengePicker,
    L: LandmarkProvider,
{
    let deadline = Instant::now() + result_timeout;

    let first = match slot.latest() {
        Some(frame) => frame,
        None => slot
            .wait_newer(None, result_timeout)
            .ok_or(EngineError::NoFrames)?,
    };
    let start_landmarks = provider.detect(&first);
    let challenge = orchestrator.start_session(mode, start_landmarks.as_ref(), first.size())?;

    let mut last_seq = first.seq;
    let mut frames = 0usize;
    loop {
        let now = Instant::now();
        if now >= deadline {
            orchestrator.cancel();
            return Err(EngineError::Timeout(result_timeout));
        }

        let Some(frame) = slot.wait_newer(Some(last_seq), FRAME_POLL.min(deadline - now)) else {
            if slot.is_closed() {
                orchestrator.cancel();
                return Err(EngineError::SourceClosed);
            }
            continue;
        };
        last_seq = frame.seq;

        let Some(landmarks) = provider.detect(&frame) else {
            tracing::trace!(seq = frame.seq, "no face");
            continue;
        };
        frames += 1;

        // On a store failure the orchestrator has already ended the session.
        let report = orchestrator.process_frame(&frame.image, &landmarks)?;
        let outcome = report.outcome.clone();
        if let Some(progress) = progress {
            let _ = progress.send(report);
        }

        if let Some(outcome) = outcome {
            return Ok(SessionSummary {
                challenge,
                outcome,
                frames,
            });
        }
    }
}
