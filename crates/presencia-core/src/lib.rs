//! Presencia core: the pieces of the registration liveness check that do not
//! touch a camera or a clock.
//!
//! Data flows one way: a [`FrameSampler`] turns a live [`VideoSource`] into a
//! small [`FrameSample`], a [`FaceAnalyzer`] scores it, and the
//! [`ChallengeEngine`] consumes the scores step by step until every step of
//! the active [`LivenessProfile`] has been satisfied. The final
//! [`VerificationResult`] is what the registration flow receives.

pub mod analyzer;
pub mod challenge;
pub mod frame;
pub mod profile;
pub mod result;

pub use analyzer::{
    assess_quality, AnalyzerHandle, AnalyzerParams, FaceAnalysis, FaceAnalyzer, HeuristicAnalyzer,
    QualityIssue, QualityReport,
};
pub use challenge::{ChallengeEngine, ChallengeProgress, StepRecord, TickOutcome};
pub use frame::{FrameError, FrameSample, FrameSampler, ReadyState, SampleError, VideoSource};
pub use profile::{ChallengeStep, LivenessProfile, ProfileError, StepCheck};
pub use result::{HandoffPayload, VerificationMethod, VerificationResult};
