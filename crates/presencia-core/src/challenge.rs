//! Liveness challenge engine: walks a profile's steps in order, one tick at a
//! time.
//!
//! Each tick contributes one analysed frame to the active step's window.
//! Once the window has covered the step's required duration the engine
//! computes the fraction of valid frames; above the profile's pass ratio
//! (or on the last step) it advances, otherwise it clears the window and
//! retries the same step. The step index never moves backwards.
//!
//! Window time advances by the tick interval. Overshoot past a step's
//! duration carries into the next window, so a flawless run takes exactly
//! `ceil(total_duration / tick_interval)` ticks.
//!
//! The engine has no clock and no ceiling of its own unless the profile sets
//! `max_step_retries`; the session above it owns timeouts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::FaceAnalysis;
use crate::profile::{ChallengeStep, LivenessProfile, StepCheck};

/// Evidence for one finished step window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    /// Mean analysis quality over the window.
    pub quality: f32,
    /// Whether the window cleared the pass ratio. Only the last step can
    /// be recorded without doing so.
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Mutable progress of one challenge run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeProgress {
    pub current_step_index: usize,
    pub valid_frame_count: u32,
    pub total_frame_count: u32,
    /// Time covered by the current window.
    pub elapsed_ms: u64,
    /// Retries of the current step so far.
    pub retries: u32,
    pub quality_sum: f32,
    pub captured_records: Vec<StepRecord>,
}

impl ChallengeProgress {
    fn reset_window(&mut self, carry_ms: u64) {
        self.valid_frame_count = 0;
        self.total_frame_count = 0;
        self.quality_sum = 0.0;
        self.elapsed_ms = carry_ms;
    }
}

/// What a single tick did to the challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Frame counted; the window is still open.
    Pending { step_index: usize, valid: bool },
    /// The step's window cleared and the next step is now active.
    StepPassed { step_index: usize, ratio: f32 },
    /// The window fell short; the same step starts over.
    StepRetry {
        step_index: usize,
        ratio: f32,
        attempt: u32,
    },
    /// The last step finished.
    Completed,
    /// The step fell short more often than the profile allows.
    StepValidationTimeout { step_index: usize, ratio: f32 },
}

pub struct ChallengeEngine {
    profile: Arc<LivenessProfile>,
    progress: ChallengeProgress,
}

impl ChallengeEngine {
    pub fn new(profile: Arc<LivenessProfile>) -> Self {
        Self {
            profile,
            progress: ChallengeProgress::default(),
        }
    }

    pub fn profile(&self) -> &LivenessProfile {
        &self.profile
    }

    pub fn progress(&self) -> &ChallengeProgress {
        &self.progress
    }

    pub fn current_step(&self) -> Option<&ChallengeStep> {
        self.profile.steps.get(self.progress.current_step_index)
    }

    pub fn is_complete(&self) -> bool {
        self.progress.current_step_index >= self.profile.steps.len()
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.progress.captured_records
    }

    /// Overall progress in `[0, 100]`, counting the open window
    /// proportionally.
    pub fn progress_percent(&self) -> f32 {
        let steps = self.profile.steps.len();
        let Some(step) = self.current_step() else {
            return 100.0;
        };
        let within = (self.progress.elapsed_ms as f32 / step.required_duration_ms as f32).min(1.0);
        ((self.progress.current_step_index as f32 + within) / steps as f32 * 100.0).clamp(0.0, 100.0)
    }

    /// Feed one analysed frame into the active step.
    pub fn tick(&mut self, analysis: &FaceAnalysis, now: DateTime<Utc>) -> TickOutcome {
        let step_index = self.progress.current_step_index;
        let step_count = self.profile.steps.len();
        let Some(step) = self.profile.steps.get(step_index) else {
            return TickOutcome::Completed;
        };

        let p = &mut self.progress;
        let valid = step.check.is_satisfied(analysis);
        p.total_frame_count += 1;
        if valid {
            p.valid_frame_count += 1;
        }
        p.quality_sum += analysis.quality;
        p.elapsed_ms += self.profile.tick_interval_ms;

        if p.elapsed_ms < step.required_duration_ms {
            return TickOutcome::Pending { step_index, valid };
        }

        let ratio = p.valid_frame_count as f32 / p.total_frame_count as f32;
        let carry = p.elapsed_ms - step.required_duration_ms;
        let passed = ratio > self.profile.pass_ratio;
        let is_last = step_index + 1 >= step_count;

        if passed || is_last {
            p.captured_records.push(StepRecord {
                step_id: step.id.clone(),
                quality: p.quality_sum / p.total_frame_count as f32,
                success: passed,
                timestamp: now,
            });
            p.current_step_index += 1;
            p.retries = 0;
            p.reset_window(carry);
            tracing::debug!(step = %step.id, ratio, passed, "challenge step finished");

            if p.current_step_index >= step_count {
                TickOutcome::Completed
            } else {
                TickOutcome::StepPassed { step_index, ratio }
            }
        } else {
            p.retries += 1;
            p.reset_window(carry);
            tracing::debug!(step = %step.id, ratio, attempt = p.retries, "challenge step retry");

            match self.profile.max_step_retries {
                Some(max) if p.retries > max => {
                    TickOutcome::StepValidationTimeout { step_index, ratio }
                }
                _ => TickOutcome::StepRetry {
                    step_index,
                    ratio,
                    attempt: p.retries,
                },
            }
        }
    }

    /// User-facing status text for a tick's outcome.
    pub fn describe(&self, outcome: &TickOutcome, analysis: &FaceAnalysis) -> String {
        let steps = &self.profile.steps;
        match outcome {
            TickOutcome::Pending { step_index, valid } => match steps.get(*step_index) {
                Some(step) => step_status(step, *valid, analysis, self.remaining_secs()),
                None => String::new(),
            },
            TickOutcome::StepPassed { step_index, .. } => {
                match (steps.get(*step_index), steps.get(step_index + 1)) {
                    (Some(done), Some(next)) => {
                        format!("{} verified. Next: {}", done.id, next.instruction)
                    }
                    _ => String::new(),
                }
            }
            TickOutcome::StepRetry { step_index, .. } => match steps.get(*step_index) {
                Some(step) => format!("Retrying: {}", step.instruction),
                None => String::new(),
            },
            TickOutcome::Completed => "Liveness verified!".to_string(),
            TickOutcome::StepValidationTimeout { step_index, .. } => match steps.get(*step_index) {
                Some(step) => format!("Could not complete \"{}\". Please try again.", step.instruction),
                None => String::new(),
            },
        }
    }

    fn remaining_secs(&self) -> u64 {
        self.current_step()
            .map(|s| s.required_duration_ms.saturating_sub(self.progress.elapsed_ms))
            .unwrap_or(0)
            .div_ceil(1000)
    }
}

fn step_status(step: &ChallengeStep, valid: bool, a: &FaceAnalysis, remaining_secs: u64) -> String {
    if valid {
        if let Some(text) = &step.success_text {
            return text.clone();
        }
    }
    let text = match (step.check, valid) {
        (StepCheck::FacePresent, true) => "Face detected",
        (StepCheck::FacePresent, false) => "Looking for face...",
        (StepCheck::FaceQuality { .. }, true) => "Position correct",
        (StepCheck::FaceQuality { .. }, false) => "Adjust your position...",
        (StepCheck::Lighting { .. }, true) => "Lighting is adequate",
        (StepCheck::Lighting { .. }, false) => "Improve the lighting...",
        (StepCheck::Movement, true) => "Natural movement detected",
        (StepCheck::Movement, false) => "Stay in front of the camera...",
        (StepCheck::Gesture { .. }, true) => {
            return format!("{} ({remaining_secs}s)", step.instruction);
        }
        (StepCheck::Gesture { .. }, false) if a.face_present => {
            return format!("{} - improving quality... ({:.0}%)", step.instruction, a.quality);
        }
        (StepCheck::Gesture { .. }, false) => {
            return format!("No face detected for {}. Stay in the frame.", step.id);
        }
    };
    text.to_string()
}
