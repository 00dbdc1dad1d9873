//! Presencia capture boundary.
//!
//! Everything that touches the capture device lives here. Streams are only
//! opened through [`request_stream`], which applies the secure-context rule,
//! and are owned by a [`CameraHandle`] that stops them exactly once.

pub mod camera;
pub mod context;
pub mod synthetic;

pub use camera::{
    request_stream, CameraError, CameraErrorKind, CameraHandle, CameraStream, CaptureConstraints,
    CaptureDevice, FacingMode,
};
pub use context::{Browser, BrowserFamily, ClientContext, Origin, OriginError};
pub use synthetic::{FramePattern, StillImageCamera, SyntheticCamera};
