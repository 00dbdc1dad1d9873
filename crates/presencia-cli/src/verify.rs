//! `presencia verify` - runs one verification session against a capture
//! device and prints the handoff payload for the registration flow.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use presencia_hw::{CameraError, CaptureDevice, FramePattern, StillImageCamera, SyntheticCamera};
use presencia_session::{spawn_session, Config, SessionHandle, StatusSnapshot};

/// Scripted camera behaviours for trying the flow without hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Synthetic {
    /// A face from the first frame
    Face,
    /// Black frames only
    Blank,
    /// Random noise
    Noise,
    /// Ten blank frames, then a face
    LateFace,
    /// Camera permission is refused
    Denied,
    /// No camera is connected
    Missing,
}

impl Synthetic {
    fn device(self) -> SyntheticCamera {
        match self {
            Synthetic::Face => SyntheticCamera::new(FramePattern::Face).with_warmup(2),
            Synthetic::Blank => SyntheticCamera::new(FramePattern::Blank),
            Synthetic::Noise => SyntheticCamera::new(FramePattern::Noise { seed: 7 }),
            Synthetic::LateFace => {
                SyntheticCamera::scripted(vec![(10, FramePattern::Blank), (1, FramePattern::Face)])
            }
            Synthetic::Denied => SyntheticCamera::failing(CameraError::Denied),
            Synthetic::Missing => SyntheticCamera::failing(CameraError::NotFound),
        }
    }
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Serve this image file as every camera frame
    #[arg(long, conflicts_with = "synthetic")]
    image: Option<PathBuf>,
    /// Use a scripted synthetic camera (default: face)
    #[arg(long, value_enum)]
    synthetic: Option<Synthetic>,
    /// Builtin profile name or TOML file (overrides PRESENCIA_PROFILE)
    #[arg(long)]
    profile: Option<String>,
    /// Page origin for the secure-context check (overrides PRESENCIA_ORIGIN)
    #[arg(long)]
    origin: Option<String>,
    /// Browser user agent for remediation text (overrides PRESENCIA_USER_AGENT)
    #[arg(long)]
    user_agent: Option<String>,
    /// Overall session timeout in seconds (overrides PRESENCIA_SESSION_TIMEOUT_SECS)
    #[arg(long)]
    timeout: Option<u64>,
}

impl VerifyArgs {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(profile) = &self.profile {
            config.profile = profile.clone();
        }
        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        if let Some(ua) = &self.user_agent {
            config.user_agent = ua.clone();
        }
        if let Some(secs) = self.timeout {
            config.session_timeout_secs = secs;
        }
        config
    }

    fn device(&self) -> Arc<dyn CaptureDevice> {
        match (&self.image, self.synthetic) {
            (Some(path), _) => Arc::new(StillImageCamera::new(path)),
            (None, synthetic) => Arc::new(synthetic.unwrap_or(Synthetic::Face).device()),
        }
    }
}

pub async fn run(args: VerifyArgs) -> Result<()> {
    let config = args.config();
    let session = config.build_session().context("failed to configure session")?;
    let device = args.device();
    tracing::info!(
        session = %session.id(),
        device = device.label(),
        timeout_secs = config.session_timeout_secs,
        "starting verification"
    );

    let handle = spawn_session(session, device, Duration::from_secs(config.session_timeout_secs));
    let last = follow(&handle).await?;

    match handle.result() {
        Some(result) => {
            let payload = serde_json::to_string_pretty(&result.handoff())?;
            println!("{payload}");
            Ok(())
        }
        None => bail!("verification {}: {}", last.phase, last.status_message),
    }
}

/// Print status lines until the session reaches a final phase. Ctrl-C
/// skips verification.
async fn follow(handle: &SessionHandle) -> Result<StatusSnapshot> {
    let mut status = handle.subscribe();
    let mut interrupted = false;
    loop {
        let snapshot = status.borrow_and_update().clone();
        eprintln!(
            "[{:>17}] {:>5.1}%  {}",
            snapshot.phase, snapshot.progress_percent, snapshot.status_message
        );
        if snapshot.phase.is_terminal() {
            return Ok(snapshot);
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(handle.status());
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                interrupted = true;
                tracing::info!("interrupted, skipping verification");
                handle.cancel().await?;
            }
        }
    }
}
