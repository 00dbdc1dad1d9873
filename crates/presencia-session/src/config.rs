use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use presencia_core::profile::BUILTIN_PROFILES;
use presencia_core::{AnalyzerHandle, LivenessProfile, ProfileError};
use presencia_hw::{ClientContext, Origin, OriginError};
use thiserror::Error;

use crate::machine::{VerificationSession, DEFAULT_MAX_ACQUIRE_ATTEMPTS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("origin error: {0}")]
    Origin(#[from] OriginError),
}

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Builtin profile name or path to a TOML profile (default: pipeline).
    pub profile: String,
    /// Origin of the page requesting the camera (default: http://localhost:3000).
    pub origin: String,
    /// User agent of the page, used for browser-specific remediation text.
    pub user_agent: String,
    /// Overall timeout in seconds for one acquisition attempt and challenge.
    pub session_timeout_secs: u64,
    /// Camera acquisition attempts per session, first attempt included.
    pub max_acquire_attempts: u32,
    /// Overrides the profile's per-step retry ceiling when set.
    pub max_step_retries: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from `PRESENCIA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            profile: lookup("PRESENCIA_PROFILE").unwrap_or_else(|| "pipeline".to_string()),
            origin: lookup("PRESENCIA_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string()),
            user_agent: lookup("PRESENCIA_USER_AGENT").unwrap_or_default(),
            session_timeout_secs: parse_or(lookup("PRESENCIA_SESSION_TIMEOUT_SECS"), 90),
            max_acquire_attempts: parse_or(
                lookup("PRESENCIA_MAX_ACQUIRE_ATTEMPTS"),
                DEFAULT_MAX_ACQUIRE_ATTEMPTS,
            ),
            max_step_retries: lookup("PRESENCIA_MAX_STEP_RETRIES").and_then(|v| v.parse().ok()),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Resolve the configured profile: a builtin name, otherwise a file path.
    pub fn load_profile(&self) -> Result<LivenessProfile, ProfileError> {
        let mut profile = if BUILTIN_PROFILES.contains(&self.profile.as_str()) {
            LivenessProfile::builtin(&self.profile)?
        } else {
            LivenessProfile::load(Path::new(&self.profile))?
        };
        if self.max_step_retries.is_some() {
            profile.max_step_retries = self.max_step_retries;
        }
        Ok(profile)
    }

    pub fn client_context(&self) -> Result<ClientContext, OriginError> {
        Ok(ClientContext::new(Origin::parse(&self.origin)?, &self.user_agent))
    }

    /// Build an idle session with the configured profile and page context.
    /// The analyzer is tuned by the profile.
    pub fn build_session(&self) -> Result<VerificationSession, ConfigError> {
        let profile = self.load_profile()?;
        let client = self.client_context()?;
        let analyzer = AnalyzerHandle::heuristic(profile.analyzer);
        tracing::info!(
            profile = %profile.name,
            origin = %client.origin,
            browser = client.browser.name(),
            steps = profile.steps.len(),
            "session configured"
        );
        Ok(VerificationSession::new(Arc::new(profile), analyzer, client)?
            .with_max_acquire_attempts(self.max_acquire_attempts))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
