//! Camera acquisition and the scoped stream handle.

use std::fmt;

use image::RgbImage;
use presencia_core::{ReadyState, VideoSource};
use thiserror::Error;

use crate::context::{Browser, BrowserFamily, ClientContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// What a stream is requested with. Audio is never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub min_width: u32,
    pub ideal_height: u32,
    pub min_height: u32,
    pub facing_mode: FacingMode,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            min_width: 320,
            ideal_height: 480,
            min_height: 240,
            facing_mode: FacingMode::User,
            audio: false,
        }
    }
}

impl CaptureConstraints {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        width >= self.min_width && height >= self.min_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraErrorKind {
    Denied,
    NotFound,
    Unsupported,
    InsecureContext,
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    Denied,
    #[error("no camera found")]
    NotFound,
    #[error("camera capture is not supported")]
    Unsupported,
    #[error("camera requires a secure context, page origin is {origin}")]
    InsecureContext { origin: String },
    #[error("camera error: {0}")]
    Unknown(String),
}

const CAMERA_PREFIX: &str = "Could not access the camera.";

impl CameraError {
    /// Map a media-capture exception name (`NotAllowedError`, ...) to an
    /// error.
    pub fn from_exception(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => CameraError::Denied,
            "NotFoundError" | "DevicesNotFoundError" => CameraError::NotFound,
            "NotSupportedError" => CameraError::Unsupported,
            _ => CameraError::Unknown(message.to_string()),
        }
    }

    pub fn kind(&self) -> CameraErrorKind {
        match self {
            CameraError::Denied => CameraErrorKind::Denied,
            CameraError::NotFound => CameraErrorKind::NotFound,
            CameraError::Unsupported => CameraErrorKind::Unsupported,
            CameraError::InsecureContext { .. } => CameraErrorKind::InsecureContext,
            CameraError::Unknown(_) => CameraErrorKind::Unknown,
        }
    }

    /// Actionable message shown to the user for this failure.
    pub fn remediation(&self, browser: &Browser) -> String {
        match self {
            CameraError::Denied => {
                let hint = permission_hint(browser);
                if hint.is_empty() {
                    format!("{CAMERA_PREFIX} Please allow camera access in your browser settings.")
                } else {
                    format!("{CAMERA_PREFIX} Please allow camera access in your browser settings. {hint}")
                }
            }
            CameraError::NotFound => format!("{CAMERA_PREFIX} No camera was found connected to this device."),
            CameraError::Unsupported => format!("{CAMERA_PREFIX} Your browser does not support this feature."),
            CameraError::InsecureContext { .. } => {
                "Camera access requires HTTPS. Open this page over https:// or from localhost.".to_string()
            }
            CameraError::Unknown(detail) => format!("{CAMERA_PREFIX} Technical error: {detail}"),
        }
    }
}

fn permission_hint(browser: &Browser) -> &'static str {
    if browser.ios {
        return "On iPhone or iPad, open Settings > Safari > Camera and choose Allow.";
    }
    match browser.family {
        BrowserFamily::Chrome => "In Chrome, click the camera icon in the address bar and choose Allow.",
        BrowserFamily::Edge => "In Edge, click the lock icon in the address bar and set Camera to Allow.",
        BrowserFamily::Firefox => {
            "In Firefox, click the camera icon next to the address bar and remove the block."
        }
        BrowserFamily::Safari => "In Safari, open Settings for This Website and set Camera to Allow.",
        BrowserFamily::Unknown => "",
    }
}

/// A live camera stream.
pub trait CameraStream: VideoSource + Send {
    fn resolution(&self) -> (u32, u32);

    /// Stop every track of the stream.
    fn stop(&mut self);
}

/// Something that can open a camera stream. `acquire` may block while the
/// device opens or the user answers a permission prompt.
pub trait CaptureDevice: Send + Sync {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, CameraError>;

    fn label(&self) -> &str;
}

/// Open a stream for the given page context. Insecure origins fail before
/// the device is touched.
pub fn request_stream(
    device: &dyn CaptureDevice,
    constraints: &CaptureConstraints,
    client: &ClientContext,
) -> Result<CameraHandle, CameraError> {
    if !client.origin.is_secure() {
        return Err(CameraError::InsecureContext {
            origin: client.origin.to_string(),
        });
    }

    let stream = device.acquire(constraints)?;
    let (width, height) = stream.resolution();
    tracing::info!(device = device.label(), width, height, "camera stream acquired");
    Ok(CameraHandle::new(stream))
}

/// Exclusive owner of an open stream. The stream is stopped exactly once:
/// on [`CameraHandle::release`] or, failing that, on drop.
pub struct CameraHandle {
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraHandle {
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("camera stream stopped");
        }
    }
}

impl VideoSource for CameraHandle {
    fn ready_state(&self) -> ReadyState {
        self.stream
            .as_ref()
            .map_or(ReadyState::Nothing, |s| s.ready_state())
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        self.stream.as_mut().and_then(|s| s.current_frame())
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("active", &self.is_active())
            .finish()
    }
}
