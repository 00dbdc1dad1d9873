//! Verification state machine.
//!
//! ```text
//! Idle -> AcquiringCamera -> SearchingFace -> RunningChallenge -> Complete
//!              |                  |                 |
//!              +------------------+-----------------+--> Failed
//! any non-final phase --cancel--> Cancelled
//! Failed | Cancelled --retry--> AcquiringCamera   (bounded attempts)
//! ```
//!
//! The machine has no clock and spawns nothing. The scheduler feeds it
//! camera results and ticks; tests can drive it directly. The camera handle
//! lives here and is released on entry to every final phase.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use presencia_core::{
    AnalyzerHandle, ChallengeEngine, ChallengeProgress, FaceAnalysis, FrameSampler, LivenessProfile,
    ProfileError, SampleError, TickOutcome, VerificationResult,
};
use presencia_hw::{CameraError, CameraHandle, ClientContext};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Camera acquisition attempts allowed per session, retries included.
pub const DEFAULT_MAX_ACQUIRE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AcquiringCamera,
    SearchingFace,
    RunningChallenge,
    Complete,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed | Phase::Cancelled)
    }

    /// Phases in which ticks sample the camera.
    pub fn is_sampling(self) -> bool {
        matches!(self, Phase::SearchingFace | Phase::RunningChallenge)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AcquiringCamera => "acquiring_camera",
            Phase::SearchingFace => "searching_face",
            Phase::RunningChallenge => "running_challenge",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What a presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub status_message: String,
    pub progress_percent: f32,
}

/// Why a session ended in [`Phase::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Camera(CameraError),
    /// Retry was requested after every acquisition attempt had been used.
    AcquisitionExhausted { attempts: u32 },
    TimedOut,
    /// A step fell short more often than the profile allows.
    StepValidationTimeout { step_id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("cannot {action} a session that is {phase}")]
    InvalidTransition { phase: Phase, action: &'static str },
    #[error("camera acquisition failed {attempts} times, giving up")]
    AttemptsExhausted { attempts: u32 },
    #[error("session task has stopped")]
    Closed,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// The session is not sampling.
    Inactive,
    /// The stream had no decodable frame; nothing changed.
    FrameNotReady,
    Analyzed(FaceAnalysis),
}

/// State of one verification attempt, owned by a single task.
pub struct VerificationSession {
    id: Uuid,
    profile: Arc<LivenessProfile>,
    analyzer: AnalyzerHandle,
    sampler: FrameSampler,
    client: ClientContext,
    max_acquire_attempts: u32,
    phase: Phase,
    status: StatusSnapshot,
    camera: Option<CameraHandle>,
    challenge: Option<ChallengeEngine>,
    failure: Option<FailureReason>,
    result: Option<VerificationResult>,
    attempts: u32,
    generation: u64,
}

impl VerificationSession {
    /// Fails if the profile does not validate.
    pub fn new(
        profile: Arc<LivenessProfile>,
        analyzer: AnalyzerHandle,
        client: ClientContext,
    ) -> Result<Self, ProfileError> {
        profile.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            profile,
            analyzer,
            sampler: FrameSampler::default(),
            client,
            max_acquire_attempts: DEFAULT_MAX_ACQUIRE_ATTEMPTS,
            phase: Phase::Idle,
            status: StatusSnapshot {
                phase: Phase::Idle,
                status_message: "Ready to verify your identity".to_string(),
                progress_percent: 0.0,
            },
            camera: None,
            challenge: None,
            failure: None,
            result: None,
            attempts: 0,
            generation: 0,
        })
    }

    pub fn with_max_acquire_attempts(mut self, attempts: u32) -> Self {
        self.max_acquire_attempts = attempts.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn profile(&self) -> &Arc<LivenessProfile> {
        &self.profile
    }

    pub fn client(&self) -> &ClientContext {
        &self.client
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn result(&self) -> Option<&VerificationResult> {
        self.result.as_ref()
    }

    pub fn challenge(&self) -> Option<&ChallengeProgress> {
        self.challenge.as_ref().map(ChallengeEngine::progress)
    }

    pub fn camera_active(&self) -> bool {
        self.camera.as_ref().is_some_and(CameraHandle::is_active)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enter `AcquiringCamera` from `Idle`. Returns the acquisition
    /// generation the camera result must be tagged with.
    pub fn begin(&mut self) -> Result<u64, SessionError> {
        if self.phase != Phase::Idle {
            return Err(SessionError::InvalidTransition {
                phase: self.phase,
                action: "begin",
            });
        }
        Ok(self.start_acquisition())
    }

    /// Re-enter `AcquiringCamera` after a failure or a skip.
    pub fn retry(&mut self) -> Result<u64, SessionError> {
        if !matches!(self.phase, Phase::Failed | Phase::Cancelled) {
            return Err(SessionError::InvalidTransition {
                phase: self.phase,
                action: "retry",
            });
        }
        if self.attempts >= self.max_acquire_attempts {
            let attempts = self.attempts;
            if self.phase == Phase::Failed {
                self.failure = Some(FailureReason::AcquisitionExhausted { attempts });
                let message = format!(
                    "The camera could not be started after {attempts} attempts. Continue without verification."
                );
                self.set_status(message, self.status.progress_percent);
            }
            tracing::warn!(session = %self.id, attempts, "acquisition attempts exhausted");
            return Err(SessionError::AttemptsExhausted { attempts });
        }
        self.failure = None;
        self.result = None;
        Ok(self.start_acquisition())
    }

    fn start_acquisition(&mut self) -> u64 {
        self.attempts += 1;
        self.generation += 1;
        self.challenge = None;
        self.transition(Phase::AcquiringCamera, "Starting camera...".to_string(), 0.0);
        tracing::info!(
            session = %self.id,
            attempt = self.attempts,
            max = self.max_acquire_attempts,
            "requesting camera stream"
        );
        self.generation
    }

    /// Whether a camera result tagged `generation` would be applied.
    pub fn is_awaiting(&self, generation: u64) -> bool {
        self.phase == Phase::AcquiringCamera && generation == self.generation
    }

    /// Deliver the outcome of an acquisition. Results for an older attempt,
    /// or arriving after the session moved on, are discarded and any stream
    /// they carry is released. Returns whether the result was applied.
    pub fn on_camera_result(&mut self, generation: u64, result: Result<CameraHandle, CameraError>) -> bool {
        if !self.is_awaiting(generation) {
            tracing::debug!(
                session = %self.id,
                generation,
                current = self.generation,
                phase = %self.phase,
                "discarding stale camera result"
            );
            if let Ok(handle) = result {
                handle.release();
            }
            return false;
        }

        match result {
            Ok(handle) => {
                self.camera = Some(handle);
                self.transition(
                    Phase::SearchingFace,
                    "Looking for a face... place yourself in front of the camera".to_string(),
                    0.0,
                );
            }
            Err(err) => {
                tracing::warn!(session = %self.id, error = %err, kind = ?err.kind(), "camera acquisition failed");
                let message = err.remediation(&self.client.browser);
                self.fail(FailureReason::Camera(err), message);
            }
        }
        true
    }

    /// Sample and analyse one frame, then apply it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        if !self.phase.is_sampling() {
            return TickReport::Inactive;
        }
        let Some(camera) = self.camera.as_mut() else {
            return TickReport::Inactive;
        };

        let frame = match self.sampler.sample(camera) {
            Ok(frame) => frame,
            Err(SampleError::NotReady) => {
                tracing::debug!(session = %self.id, "frame not ready, skipping tick");
                return TickReport::FrameNotReady;
            }
        };
        let analysis = self.analyzer.analyze(&frame);
        drop(frame);

        tracing::debug!(
            session = %self.id,
            face_present = analysis.face_present,
            quality = analysis.quality,
            brightness = analysis.brightness,
            skin_ratio = analysis.skin_ratio,
            "frame analysed"
        );
        self.apply_analysis(&analysis, now);
        TickReport::Analyzed(analysis)
    }

    /// Advance on an analysis result. Ignored, returning `false`, unless
    /// the session is searching for a face or running the challenge.
    pub fn apply_analysis(&mut self, analysis: &FaceAnalysis, now: DateTime<Utc>) -> bool {
        match self.phase {
            Phase::SearchingFace => {
                if analysis.face_present && analysis.quality > self.profile.bootstrap_min_quality {
                    self.start_challenge();
                } else {
                    self.set_status(searching_message(analysis.quality), 0.0);
                }
                true
            }
            Phase::RunningChallenge => {
                self.advance_challenge(analysis, now);
                true
            }
            _ => false,
        }
    }

    fn start_challenge(&mut self) {
        let engine = ChallengeEngine::new(Arc::clone(&self.profile));
        let message = engine
            .current_step()
            .map(|s| s.instruction.clone())
            .unwrap_or_default();
        self.challenge = Some(engine);
        self.transition(Phase::RunningChallenge, message, 0.0);
    }

    fn advance_challenge(&mut self, analysis: &FaceAnalysis, now: DateTime<Utc>) {
        let Some(engine) = self.challenge.as_mut() else {
            return;
        };
        let outcome = engine.tick(analysis, now);
        let message = engine.describe(&outcome, analysis);
        let progress = engine.progress_percent();

        match outcome {
            TickOutcome::Completed => {
                let records = self
                    .challenge
                    .take()
                    .map(ChallengeEngine::into_records)
                    .unwrap_or_default();
                let result = VerificationResult::completed(self.profile.method, records, now);
                tracing::info!(
                    session = %self.id,
                    quality = result.overall_quality,
                    steps = result.step_records.len(),
                    "liveness verified"
                );
                self.result = Some(result);
                self.release_camera();
                self.transition(Phase::Complete, message, 100.0);
            }
            TickOutcome::StepValidationTimeout { step_index, .. } => {
                let step_id = self
                    .profile
                    .steps
                    .get(step_index)
                    .map(|s| s.id.clone())
                    .unwrap_or_default();
                self.fail(FailureReason::StepValidationTimeout { step_id }, message);
            }
            TickOutcome::StepPassed { .. } | TickOutcome::StepRetry { .. } | TickOutcome::Pending { .. } => {
                self.set_status(message, progress);
            }
        }
    }

    /// User skipped verification. Progress is discarded and the camera
    /// released. No-op once complete or already cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(self.phase, Phase::Complete | Phase::Cancelled) {
            return false;
        }
        // Outstanding acquisitions become stale.
        self.generation += 1;
        self.challenge = None;
        self.failure = None;
        self.release_camera();
        self.result = Some(VerificationResult::skipped(now));
        self.transition(Phase::Cancelled, "Verification skipped".to_string(), 0.0);
        true
    }

    /// The overall session deadline passed.
    pub fn time_out(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        tracing::warn!(session = %self.id, phase = %self.phase, "session timed out");
        self.generation += 1;
        self.fail(
            FailureReason::TimedOut,
            "Verification timed out. Check your lighting and try again.".to_string(),
        );
        true
    }

    fn fail(&mut self, reason: FailureReason, message: String) {
        self.challenge = None;
        self.release_camera();
        self.failure = Some(reason);
        let progress = self.status.progress_percent;
        self.transition(Phase::Failed, message, progress);
    }

    fn release_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.release();
        }
    }

    fn transition(&mut self, phase: Phase, message: String, progress: f32) {
        tracing::info!(session = %self.id, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
        self.set_status(message, progress);
    }

    fn set_status(&mut self, message: String, progress: f32) {
        self.status = StatusSnapshot {
            phase: self.phase,
            status_message: message,
            progress_percent: progress,
        };
    }
}

fn searching_message(quality: f32) -> String {
    let q = quality.round();
    if quality > 80.0 {
        format!("Excellent quality: {q}% - verifying...")
    } else if quality > 60.0 {
        format!("Good quality: {q}% - hold your position")
    } else if quality > 30.0 {
        format!("Adjusting quality: {q}% - find better light")
    } else if quality > 0.0 {
        format!("Checking lighting: {q}%")
    } else {
        "Looking for a face... place yourself in front of the camera".to_string()
    }
}

impl fmt::Debug for VerificationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationSession")
            .field("id", &self.id)
            .field("profile", &self.profile.name)
            .field("phase", &self.phase)
            .field("attempts", &self.attempts)
            .field("camera_active", &self.camera_active())
            .finish()
    }
}
