//! Capture devices that need no camera hardware: scripted synthetic frames
//! and a single still image.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use presencia_core::{ReadyState, VideoSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::{CameraError, CameraStream, CaptureConstraints, CaptureDevice};

const SKIN: Rgb<u8> = Rgb([198, 142, 112]);
const BACKDROP: Rgb<u8> = Rgb([96, 104, 112]);

/// Content of one synthetic frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePattern {
    /// Skin-toned ellipse centred on a muted backdrop.
    Face,
    /// Uniformly black.
    Blank,
    /// Uniform colour.
    Solid([u8; 3]),
    /// Random bytes; the seed is offset by the frame index.
    Noise { seed: u64 },
}

impl FramePattern {
    pub fn render(&self, width: u32, height: u32, frame_index: usize) -> RgbImage {
        match self {
            FramePattern::Face => render_face(width, height),
            FramePattern::Blank => RgbImage::new(width, height),
            FramePattern::Solid(rgb) => RgbImage::from_pixel(width, height, Rgb(*rgb)),
            FramePattern::Noise { seed } => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(frame_index as u64));
                let mut buf = vec![0u8; width as usize * height as usize * 3];
                rng.fill(&mut buf[..]);
                RgbImage::from_raw(width, height, buf).unwrap_or_else(|| RgbImage::new(width, height))
            }
        }
    }
}

fn render_face(width: u32, height: u32) -> RgbImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (ax, ay) = (width as f32 * 0.2, height as f32 * 0.3);
    RgbImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 - cx) / ax;
        let dy = (y as f32 - cy) / ay;
        if dx * dx + dy * dy <= 1.0 {
            SKIN
        } else {
            BACKDROP
        }
    })
}

/// A camera that plays back a script of frame patterns.
///
/// Each grab consumes one script entry; the last entry repeats forever.
/// The first `warmup` readiness polls report only metadata, like a stream
/// that has not decoded its first frame yet.
pub struct SyntheticCamera {
    script: Arc<[FramePattern]>,
    width: u32,
    height: u32,
    warmup: usize,
    failure: Option<CameraError>,
    acquisitions: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new(pattern: FramePattern) -> Self {
        Self::scripted(vec![(1, pattern)])
    }

    /// Build from `(count, pattern)` runs played in order.
    pub fn scripted(runs: Vec<(usize, FramePattern)>) -> Self {
        let mut script: Vec<FramePattern> = runs
            .into_iter()
            .flat_map(|(count, pattern)| std::iter::repeat(pattern).take(count))
            .collect();
        if script.is_empty() {
            script.push(FramePattern::Blank);
        }
        Self {
            script: script.into(),
            width: 640,
            height: 480,
            warmup: 0,
            failure: None,
            acquisitions: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A camera whose acquisition always fails with `error`.
    pub fn failing(error: CameraError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(FramePattern::Blank)
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_warmup(mut self, polls: usize) -> Self {
        self.warmup = polls;
        self
    }

    /// Number of `stop()` calls across every stream this camera opened.
    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }

    /// Number of acquisition attempts that reached the device.
    pub fn acquisition_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.acquisitions)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, CameraError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if !constraints.accepts(self.width, self.height) {
            return Err(CameraError::Unknown(format!(
                "camera resolution {}x{} below the requested minimum",
                self.width, self.height
            )));
        }
        Ok(Box::new(SyntheticStream {
            script: Arc::clone(&self.script),
            width: self.width,
            height: self.height,
            next: 0,
            warmup: self.warmup,
            polls: Cell::new(0),
            stopped: false,
            stops: Arc::clone(&self.stops),
        }))
    }

    fn label(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticStream {
    script: Arc<[FramePattern]>,
    width: u32,
    height: u32,
    next: usize,
    warmup: usize,
    polls: Cell<usize>,
    stopped: bool,
    stops: Arc<AtomicUsize>,
}

impl VideoSource for SyntheticStream {
    fn ready_state(&self) -> ReadyState {
        if self.stopped {
            return ReadyState::Nothing;
        }
        let polls = self.polls.get();
        self.polls.set(polls + 1);
        if polls < self.warmup {
            ReadyState::Metadata
        } else {
            ReadyState::EnoughData
        }
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        if self.stopped {
            return None;
        }
        let pattern = &self.script[self.next.min(self.script.len() - 1)];
        let frame = pattern.render(self.width, self.height, self.next);
        self.next += 1;
        Some(frame)
    }
}

impl CameraStream for SyntheticStream {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves one decoded image file as every frame.
pub struct StillImageCamera {
    path: PathBuf,
}

impl StillImageCamera {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CaptureDevice for StillImageCamera {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, CameraError> {
        let image = image::open(&self.path).map_err(|e| match e {
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                CameraError::NotFound
            }
            other => CameraError::Unknown(format!("{}: {other}", self.path.display())),
        })?;
        let frame = image.to_rgb8();
        if !constraints.accepts(frame.width(), frame.height()) {
            return Err(CameraError::Unknown(format!(
                "image {}x{} below the requested minimum",
                frame.width(),
                frame.height()
            )));
        }
        Ok(Box::new(StillStream {
            frame: Some(frame),
        }))
    }

    fn label(&self) -> &str {
        "still-image"
    }
}

struct StillStream {
    frame: Option<RgbImage>,
}

impl VideoSource for StillStream {
    fn ready_state(&self) -> ReadyState {
        if self.frame.is_some() {
            ReadyState::EnoughData
        } else {
            ReadyState::Nothing
        }
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        self.frame.clone()
    }
}

impl CameraStream for StillStream {
    fn resolution(&self) -> (u32, u32) {
        self.frame.as_ref().map_or((0, 0), |f| f.dimensions())
    }

    fn stop(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presencia_core::{AnalyzerParams, FaceAnalyzer, FrameSampler, HeuristicAnalyzer};

    fn open(camera: &SyntheticCamera) -> Box<dyn CameraStream> {
        camera.acquire(&CaptureConstraints::default()).unwrap()
    }

    #[test]
    fn test_face_pattern_is_detected_by_both_analyzers() {
        let camera = SyntheticCamera::new(FramePattern::Face);
        let mut stream = open(&camera);
        let frame = FrameSampler::default().sample(stream.as_mut()).unwrap();
        for params in [AnalyzerParams::wide(), AnalyzerParams::narrow()] {
            let a = HeuristicAnalyzer::new(params).analyze(&frame);
            assert!(a.face_present, "{params:?}");
            assert!(a.quality > 70.0, "quality {}", a.quality);
        }
    }

    #[test]
    fn test_blank_pattern_has_no_face() {
        let camera = SyntheticCamera::new(FramePattern::Blank);
        let mut stream = open(&camera);
        let frame = FrameSampler::default().sample(stream.as_mut()).unwrap();
        let a = HeuristicAnalyzer::default().analyze(&frame);
        assert!(!a.face_present);
        assert_eq!(a.quality, 0.0);
    }

    #[test]
    fn test_script_plays_in_order_then_repeats_last() {
        let camera = SyntheticCamera::scripted(vec![
            (2, FramePattern::Solid([1, 1, 1])),
            (1, FramePattern::Solid([2, 2, 2])),
        ]);
        let mut stream = open(&camera);
        let seen: Vec<u8> = (0..5)
            .map(|_| stream.current_frame().unwrap().get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(seen, [1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_warmup_reports_not_ready() {
        let camera = SyntheticCamera::new(FramePattern::Face).with_warmup(2);
        let mut stream = open(&camera);
        let sampler = FrameSampler::default();
        assert!(sampler.sample(stream.as_mut()).is_err());
        assert!(sampler.sample(stream.as_mut()).is_err());
        assert!(sampler.sample(stream.as_mut()).is_ok());
    }

    #[test]
    fn test_noise_is_reproducible() {
        let a = FramePattern::Noise { seed: 42 }.render(32, 24, 3);
        let b = FramePattern::Noise { seed: 42 }.render(32, 24, 3);
        let c = FramePattern::Noise { seed: 42 }.render(32, 24, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_failing_camera() {
        let camera = SyntheticCamera::failing(CameraError::Denied);
        assert_eq!(
            camera.acquire(&CaptureConstraints::default()).err(),
            Some(CameraError::Denied)
        );
        assert_eq!(camera.acquisition_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_low_resolution_rejected() {
        let camera = SyntheticCamera::new(FramePattern::Face).with_resolution(160, 120);
        assert!(matches!(
            camera.acquire(&CaptureConstraints::default()),
            Err(CameraError::Unknown(_))
        ));
    }

    #[test]
    fn test_missing_image_is_not_found() {
        let camera = StillImageCamera::new("/nonexistent/presencia/face.png");
        assert!(matches!(
            camera.acquire(&CaptureConstraints::default()),
            Err(CameraError::NotFound)
        ));
    }

    #[test]
    fn test_still_image_roundtrip_through_disk() {
        let dir = std::env::temp_dir().join(format!(
            "presencia-still-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("face.png");
        FramePattern::Face.render(640, 480, 0).save(&path).unwrap();

        let mut stream = StillImageCamera::new(&path)
            .acquire(&CaptureConstraints::default())
            .unwrap();
        assert_eq!(stream.resolution(), (640, 480));
        let frame = FrameSampler::default().sample(stream.as_mut()).unwrap();
        assert!(HeuristicAnalyzer::default().analyze(&frame).face_present);

        stream.stop();
        assert_eq!(stream.ready_state(), ReadyState::Nothing);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
