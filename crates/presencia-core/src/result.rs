//! Verification outcome and the payload handed to the registration flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::StepRecord;

/// How a verification outcome was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    #[serde(rename = "visual_detection")]
    Visual,
    HeuristicGesture,
    Manual,
    Skipped,
}

/// Final, immutable outcome of one verification session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub passed: bool,
    pub overall_quality: f32,
    pub method: VerificationMethod,
    pub step_records: Vec<StepRecord>,
    pub completed_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Every challenge step was satisfied. Quality is the mean of the
    /// per-step qualities.
    pub fn completed(
        method: VerificationMethod,
        step_records: Vec<StepRecord>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let overall_quality = if step_records.is_empty() {
            0.0
        } else {
            step_records.iter().map(|r| r.quality).sum::<f32>() / step_records.len() as f32
        };
        Self {
            passed: true,
            overall_quality,
            method,
            step_records,
            completed_at,
        }
    }

    /// The user chose to skip verification. Any partial progress is dropped.
    pub fn skipped(completed_at: DateTime<Utc>) -> Self {
        Self {
            passed: false,
            overall_quality: 0.0,
            method: VerificationMethod::Skipped,
            step_records: Vec::new(),
            completed_at,
        }
    }

    pub fn handoff(&self) -> HandoffPayload {
        HandoffPayload::from(self)
    }
}

/// Verification section of a registration submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffPayload {
    pub face_verification: FaceVerification,
    pub liveness_verification: LivenessVerification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerification {
    pub verified: bool,
    pub method: VerificationMethod,
    pub quality: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessVerification {
    pub completed: bool,
    pub gestures: Vec<GestureOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureOutcome {
    pub gesture: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&VerificationResult> for HandoffPayload {
    fn from(result: &VerificationResult) -> Self {
        Self {
            face_verification: FaceVerification {
                verified: result.passed,
                method: result.method,
                quality: result.overall_quality,
                timestamp: result.completed_at,
            },
            liveness_verification: LivenessVerification {
                completed: result.passed,
                gestures: result
                    .step_records
                    .iter()
                    .map(|r| GestureOutcome {
                        gesture: r.step_id.clone(),
                        success: r.success,
                        timestamp: r.timestamp,
                    })
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step_id: &str, quality: f32, success: bool) -> StepRecord {
        StepRecord {
            step_id: step_id.to_string(),
            quality,
            success,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_completed_averages_quality() {
        let result = VerificationResult::completed(
            VerificationMethod::HeuristicGesture,
            vec![record("look_up", 80.0, true), record("smile", 90.0, true)],
            Utc::now(),
        );
        assert!(result.passed);
        assert!((result.overall_quality - 85.0).abs() < 1e-6);
    }

    #[test]
    fn test_completed_without_records() {
        let result = VerificationResult::completed(VerificationMethod::Manual, vec![], Utc::now());
        assert!(result.passed);
        assert_eq!(result.overall_quality, 0.0);
    }

    #[test]
    fn test_skipped_is_not_passed() {
        let result = VerificationResult::skipped(Utc::now());
        assert!(!result.passed);
        assert_eq!(result.method, VerificationMethod::Skipped);
        assert!(result.step_records.is_empty());
    }

    #[test]
    fn test_handoff_json_shape() {
        let result = VerificationResult::completed(
            VerificationMethod::Visual,
            vec![record("face_detection", 90.0, true), record("final_validation", 70.0, false)],
            Utc::now(),
        );
        let json = serde_json::to_value(result.handoff()).unwrap();

        assert_eq!(json["faceVerification"]["verified"], true);
        assert_eq!(json["faceVerification"]["method"], "visual_detection");
        assert_eq!(json["faceVerification"]["quality"], 80.0);
        assert!(json["faceVerification"]["timestamp"].is_string());
        assert_eq!(json["livenessVerification"]["completed"], true);

        let gestures = json["livenessVerification"]["gestures"].as_array().unwrap();
        assert_eq!(gestures.len(), 2);
        assert_eq!(gestures[0]["gesture"], "face_detection");
        assert_eq!(gestures[1]["success"], false);
    }

    #[test]
    fn test_method_names() {
        let names: Vec<String> = [
            VerificationMethod::Visual,
            VerificationMethod::HeuristicGesture,
            VerificationMethod::Manual,
            VerificationMethod::Skipped,
        ]
        .iter()
        .map(|m| serde_json::to_string(m).unwrap())
        .collect();
        assert_eq!(
            names,
            [r#""visual_detection""#, r#""heuristic_gesture""#, r#""manual""#, r#""skipped""#]
        );
    }
}
