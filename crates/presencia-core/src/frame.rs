//! Frame sampling: grab the frame currently shown by a video source and
//! shrink it to a fixed analysis resolution.
//!
//! The native frame is decoded, resized and dropped inside a single
//! [`FrameSampler::sample`] call. Only the small [`FrameSample`] leaves it,
//! so analysis cost does not depend on the camera's resolution.

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

/// Default analysis width in pixels.
pub const ANALYSIS_WIDTH: u32 = 160;
/// Default analysis height in pixels.
pub const ANALYSIS_HEIGHT: u32 = 120;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer length {len} does not match {width}x{height}x{channels}")]
    LengthMismatch {
        len: usize,
        width: u32,
        height: u32,
        channels: u8,
    },
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    /// The stream has not buffered a decodable frame yet. Transient: the
    /// caller skips the tick.
    #[error("video source has no decodable frame yet")]
    NotReady,
}

/// How much data a video source has buffered, ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Nothing,
    Metadata,
    CurrentData,
    FutureData,
    EnoughData,
}

/// A live video stream that can hand out its current frame.
pub trait VideoSource {
    fn ready_state(&self) -> ReadyState;

    /// Decode the frame currently being displayed, at native resolution.
    fn current_frame(&mut self) -> Option<RgbImage>;
}

/// A small RGB frame captured at a point in time.
#[derive(Debug, Clone)]
pub struct FrameSample {
    data: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: DateTime<Utc>,
}

impl FrameSample {
    /// Build a sample from tightly packed RGB bytes.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                len: data.len(),
                width,
                height,
                channels: 3,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    /// Build a sample from RGBA bytes (canvas layout); alpha is discarded.
    pub fn from_rgba(data: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                len: data.len(),
                width,
                height,
                channels: 4,
            });
        }
        let rgb = data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        Self::from_rgb(rgb, width, height)
    }

    pub fn from_image(image: RgbImage) -> Result<Self, FrameError> {
        let (width, height) = image.dimensions();
        Self::from_rgb(image.into_raw(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// RGB triple at `(x, y)`. Panics if the coordinate is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Pulls one downsampled frame per call from a [`VideoSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    width: u32,
    height: u32,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(ANALYSIS_WIDTH, ANALYSIS_HEIGHT)
    }
}

impl FrameSampler {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Sample the source's current frame at the analysis resolution.
    ///
    /// Fails with [`SampleError::NotReady`] until the source has at least
    /// the current frame buffered and that frame has a non-zero size.
    pub fn sample<S: VideoSource + ?Sized>(&self, source: &mut S) -> Result<FrameSample, SampleError> {
        if source.ready_state() < ReadyState::CurrentData {
            return Err(SampleError::NotReady);
        }
        let native = source.current_frame().ok_or(SampleError::NotReady)?;
        if native.width() == 0 || native.height() == 0 {
            return Err(SampleError::NotReady);
        }

        let scaled = if native.dimensions() == (self.width, self.height) {
            native
        } else {
            image::imageops::resize(&native, self.width, self.height, FilterType::Triangle)
        };

        FrameSample::from_image(scaled).map_err(|_| SampleError::NotReady)
    }
}
