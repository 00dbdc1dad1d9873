//! One verification session from camera request to handoff.
//!
//! [`VerificationSession`] is the state machine. [`spawn_session`] puts it
//! on a tokio task that drives it from a single queue and publishes status
//! through a [`SessionHandle`]. [`Config`] reads the `PRESENCIA_*`
//! environment.

pub mod config;
pub mod machine;
pub mod scheduler;

pub use config::{Config, ConfigError};
pub use machine::{
    FailureReason, Phase, SessionError, StatusSnapshot, TickReport, VerificationSession,
    DEFAULT_MAX_ACQUIRE_ATTEMPTS,
};
pub use scheduler::{spawn_session, SessionHandle};
