//! Liveness profiles: the ordered challenge steps plus every threshold the
//! engine and analyzer use.
//!
//! Two profiles ship built in. `pipeline` is a fast five-stage check at a
//! 200 ms tick; `gestures` walks the user through five prompts at a 1 s
//! tick. Custom profiles load from TOML with the same shape.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::{AnalyzerParams, FaceAnalysis};
use crate::result::VerificationMethod;

/// Names accepted by [`LivenessProfile::builtin`].
pub const BUILTIN_PROFILES: &[&str] = &["pipeline", "gestures"];

const DEFAULT_PASS_RATIO: f32 = 0.6;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("unknown builtin profile: {0}")]
    UnknownBuiltin(String),
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// Per-step validity predicate over one frame's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepCheck {
    FacePresent,
    FaceQuality { min_quality: f32 },
    Lighting { min_brightness: f32, max_brightness: f32 },
    /// Motion is not measured; a present face is taken as moving.
    Movement,
    /// Directional and expression prompts. Gaze and expression are not
    /// estimated; only presence and quality are checked.
    Gesture { min_quality: f32 },
}

impl StepCheck {
    pub fn is_satisfied(&self, a: &FaceAnalysis) -> bool {
        match *self {
            StepCheck::FacePresent | StepCheck::Movement => a.face_present,
            StepCheck::FaceQuality { min_quality } | StepCheck::Gesture { min_quality } => {
                a.face_present && a.quality > min_quality
            }
            StepCheck::Lighting {
                min_brightness,
                max_brightness,
            } => a.brightness > min_brightness && a.brightness < max_brightness,
        }
    }
}

/// One prompt in the challenge sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeStep {
    pub id: String,
    pub instruction: String,
    pub required_duration_ms: u64,
    /// Status shown while the step is being satisfied, overriding the
    /// check's default text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_text: Option<String>,
    pub check: StepCheck,
}

impl ChallengeStep {
    pub fn new(id: &str, instruction: &str, required_duration_ms: u64, check: StepCheck) -> Self {
        Self {
            id: id.to_string(),
            instruction: instruction.to_string(),
            required_duration_ms,
            success_text: None,
            check,
        }
    }

    pub fn with_success_text(mut self, text: &str) -> Self {
        self.success_text = Some(text.to_string());
        self
    }
}

/// Ordered steps and thresholds selecting one liveness behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessProfile {
    pub name: String,
    pub tick_interval_ms: u64,
    /// Minimum quality of a face-present frame to leave face search.
    pub bootstrap_min_quality: f32,
    /// A step passes when more than this fraction of its frames are valid.
    #[serde(default = "default_pass_ratio")]
    pub pass_ratio: f32,
    pub method: VerificationMethod,
    /// Retries allowed per step before the session fails. `None` retries
    /// forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step_retries: Option<u32>,
    #[serde(default)]
    pub analyzer: AnalyzerParams,
    pub steps: Vec<ChallengeStep>,
}

fn default_pass_ratio() -> f32 {
    DEFAULT_PASS_RATIO
}

impl LivenessProfile {
    /// Five-stage pipeline: detection, position, lighting, movement, final.
    pub fn pipeline() -> Self {
        Self {
            name: "pipeline".to_string(),
            tick_interval_ms: 200,
            bootstrap_min_quality: 30.0,
            pass_ratio: DEFAULT_PASS_RATIO,
            method: VerificationMethod::Visual,
            max_step_retries: None,
            analyzer: AnalyzerParams::narrow(),
            steps: vec![
                ChallengeStep::new("face_detection", "Detecting face...", 2000, StepCheck::FacePresent),
                ChallengeStep::new(
                    "position_check",
                    "Check your position...",
                    1500,
                    StepCheck::FaceQuality { min_quality: 30.0 },
                ),
                ChallengeStep::new(
                    "brightness_check",
                    "Analyzing lighting...",
                    1500,
                    StepCheck::Lighting {
                        min_brightness: 80.0,
                        max_brightness: 200.0,
                    },
                ),
                ChallengeStep::new(
                    "movement_check",
                    "Detecting natural movement...",
                    2000,
                    StepCheck::Movement,
                ),
                ChallengeStep::new(
                    "final_validation",
                    "Final validation...",
                    1000,
                    StepCheck::FaceQuality { min_quality: 40.0 },
                )
                .with_success_text("Validating identity..."),
            ],
        }
    }

    /// Five prompted gestures, five seconds each.
    pub fn gestures() -> Self {
        let gesture = StepCheck::Gesture { min_quality: 70.0 };
        Self {
            name: "gestures".to_string(),
            tick_interval_ms: 1000,
            bootstrap_min_quality: 50.0,
            pass_ratio: DEFAULT_PASS_RATIO,
            method: VerificationMethod::HeuristicGesture,
            max_step_retries: None,
            analyzer: AnalyzerParams::wide(),
            steps: vec![
                ChallengeStep::new("look_up", "Look UP", 5000, gesture),
                ChallengeStep::new("look_down", "Look DOWN", 5000, gesture),
                ChallengeStep::new("look_left", "Look LEFT", 5000, gesture),
                ChallengeStep::new("look_right", "Look RIGHT", 5000, gesture),
                ChallengeStep::new("smile", "SMILE", 5000, gesture),
            ],
        }
    }

    pub fn builtin(name: &str) -> Result<Self, ProfileError> {
        match name {
            "pipeline" => Ok(Self::pipeline()),
            "gestures" => Ok(Self::gestures()),
            other => Err(ProfileError::UnknownBuiltin(other.to_string())),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ProfileError> {
        let profile: Self = toml::from_str(s)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), name = %profile.name, "loaded liveness profile");
        Ok(profile)
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |msg: String| Err(ProfileError::Invalid(msg));

        if self.steps.is_empty() {
            return invalid("profile has no steps".to_string());
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.pass_ratio) {
            return invalid(format!("pass_ratio {} outside [0, 1)", self.pass_ratio));
        }
        if !(0.0..=100.0).contains(&self.bootstrap_min_quality) {
            return invalid(format!(
                "bootstrap_min_quality {} outside [0, 100]",
                self.bootstrap_min_quality
            ));
        }
        let a = &self.analyzer;
        if a.roi_divisor == 0 {
            return invalid("analyzer.roi_divisor must be positive".to_string());
        }
        if ![a.skin_weight, a.brightness_weight, a.min_skin_ratio, a.min_brightness, a.max_brightness]
            .iter()
            .all(|v| v.is_finite())
        {
            return invalid("analyzer parameters must be finite".to_string());
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return invalid(format!("duplicate step id: {}", step.id));
            }
            if step.required_duration_ms == 0 {
                return invalid(format!("step {} has zero duration", step.id));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.required_duration_ms).sum()
    }

    /// Ticks a flawless run needs to clear every step.
    pub fn minimum_ticks(&self) -> u64 {
        self.total_duration_ms().div_ceil(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(face_present: bool, quality: f32, brightness: f32) -> FaceAnalysis {
        FaceAnalysis {
            face_present,
            quality,
            brightness,
            skin_ratio: if face_present { 0.5 } else { 0.0 },
        }
    }

    #[test]
    fn test_builtins_validate() {
        for name in BUILTIN_PROFILES {
            let profile = LivenessProfile::builtin(name).unwrap();
            profile.validate().unwrap();
            assert_eq!(profile.steps.len(), 5);
        }
    }

    #[test]
    fn test_unknown_builtin() {
        let err = LivenessProfile::builtin("full").unwrap_err();
        assert!(matches!(err, ProfileError::UnknownBuiltin(ref n) if n == "full"));
    }

    #[test]
    fn test_minimum_ticks() {
        assert_eq!(LivenessProfile::pipeline().minimum_ticks(), 40);
        assert_eq!(LivenessProfile::gestures().minimum_ticks(), 25);
    }

    #[test]
    fn test_gesture_order() {
        let ids: Vec<_> = LivenessProfile::gestures()
            .steps
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(ids, ["look_up", "look_down", "look_left", "look_right", "smile"]);
    }

    #[test]
    fn test_step_checks() {
        assert!(StepCheck::FacePresent.is_satisfied(&analysis(true, 10.0, 100.0)));
        assert!(!StepCheck::FacePresent.is_satisfied(&analysis(false, 90.0, 100.0)));

        let quality = StepCheck::FaceQuality { min_quality: 30.0 };
        assert!(quality.is_satisfied(&analysis(true, 31.0, 100.0)));
        assert!(!quality.is_satisfied(&analysis(true, 30.0, 100.0)));

        let light = StepCheck::Lighting {
            min_brightness: 80.0,
            max_brightness: 200.0,
        };
        // Lighting ignores face presence
        assert!(light.is_satisfied(&analysis(false, 0.0, 120.0)));
        assert!(!light.is_satisfied(&analysis(true, 90.0, 80.0)));
        assert!(!light.is_satisfied(&analysis(true, 90.0, 200.0)));

        // Any present face with quality satisfies a directional prompt
        let gesture = StepCheck::Gesture { min_quality: 70.0 };
        assert!(gesture.is_satisfied(&analysis(true, 71.0, 100.0)));
        assert!(!gesture.is_satisfied(&analysis(false, 99.0, 100.0)));
    }

    #[test]
    fn test_toml_roundtrip_preserves_profile() {
        let profile = LivenessProfile::pipeline();
        let text = profile.to_toml_string().unwrap();
        assert_eq!(LivenessProfile::from_toml_str(&text).unwrap(), profile);
    }

    #[test]
    fn test_toml_defaults() {
        let profile = LivenessProfile::from_toml_str(
            r#"
            name = "quick"
            tick_interval_ms = 100
            bootstrap_min_quality = 40.0
            method = "manual"

            [[steps]]
            id = "hold"
            instruction = "Hold still"
            required_duration_ms = 300
            check = { kind = "face_present" }
            "#,
        )
        .unwrap();
        assert_eq!(profile.pass_ratio, DEFAULT_PASS_RATIO);
        assert_eq!(profile.analyzer, AnalyzerParams::wide());
        assert_eq!(profile.max_step_retries, None);
        assert_eq!(profile.method, VerificationMethod::Manual);
    }

    #[test]
    fn test_validate_rejects_bad_profiles() {
        let mut empty = LivenessProfile::pipeline();
        empty.steps.clear();
        assert!(matches!(empty.validate(), Err(ProfileError::Invalid(_))));

        let mut zero_tick = LivenessProfile::pipeline();
        zero_tick.tick_interval_ms = 0;
        assert!(zero_tick.validate().is_err());

        let mut dup = LivenessProfile::gestures();
        dup.steps[1].id = "look_up".to_string();
        assert!(dup.validate().is_err());

        let mut ratio = LivenessProfile::gestures();
        ratio.pass_ratio = 1.0;
        assert!(ratio.validate().is_err());

        let mut nan = LivenessProfile::gestures();
        nan.analyzer.skin_weight = f32::NAN;
        assert!(nan.validate().is_err());
    }
}
