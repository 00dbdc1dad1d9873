//! Heuristic face analysis by skin-tone ratio and brightness.
//!
//! This is a colour heuristic, not a trained detector. A centred square
//! region of interest is scanned; a pixel counts as skin when it passes a
//! fixed RGB rule. The ratio of skin pixels and the mean brightness of the
//! region drive both the quality score and the face-present signal.
//!
//! # Threat Coverage
//!
//! - **Blocks:** nothing beyond an empty, dark or blown-out frame.
//! - **Does not block:** photographs, screens, or any skin-coloured object
//!   held in the centre of the frame.
//!
//! The analyzer sits behind [`FaceAnalyzer`] so a real model can replace it
//! without touching the challenge engine or the session state machine.
//!
//! [`assess_quality`] is separate: it grades the whole frame's lighting and
//! contrast and says what the user should change.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::frame::FrameSample;

/// Result of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceAnalysis {
    pub face_present: bool,
    /// Heuristic quality in `[0, 100]`.
    pub quality: f32,
    /// Mean brightness of the region of interest in `[0, 255]`.
    pub brightness: f32,
    /// Fraction of skin-tone pixels in the region of interest, `[0, 1]`.
    pub skin_ratio: f32,
}

impl FaceAnalysis {
    pub const EMPTY: FaceAnalysis = FaceAnalysis {
        face_present: false,
        quality: 0.0,
        brightness: 0.0,
        skin_ratio: 0.0,
    };
}

/// Tuning for [`HeuristicAnalyzer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerParams {
    /// ROI half-size is `min(width, height) / roi_divisor`.
    pub roi_divisor: u32,
    /// Weight of the skin ratio in the quality score.
    pub skin_weight: f32,
    /// Weight of normalised brightness in the quality score.
    pub brightness_weight: f32,
    /// Skin ratio that must be exceeded for a face to be present.
    pub min_skin_ratio: f32,
    /// Exclusive lower bound of the acceptable brightness band.
    pub min_brightness: f32,
    /// Exclusive upper bound of the acceptable brightness band.
    pub max_brightness: f32,
}

impl AnalyzerParams {
    /// Quarter-size ROI with a moderate skin weight. A well-lit face that
    /// fills about half of the ROI scores in the 70s.
    pub const fn wide() -> Self {
        Self {
            roi_divisor: 4,
            skin_weight: 100.0,
            brightness_weight: 50.0,
            min_skin_ratio: 0.10,
            min_brightness: 50.0,
            max_brightness: 230.0,
        }
    }

    /// Sixth-size ROI with a steep skin weight; saturates quickly.
    pub const fn narrow() -> Self {
        Self {
            roi_divisor: 6,
            skin_weight: 500.0,
            ..Self::wide()
        }
    }

    pub fn brightness_in_band(&self, brightness: f32) -> bool {
        brightness > self.min_brightness && brightness < self.max_brightness
    }
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self::wide()
    }
}

/// Anything that can score a frame for face presence and quality.
///
/// Implementations must be deterministic for a given frame and must never
/// fail: unusable input yields [`FaceAnalysis::EMPTY`] or similar.
pub trait FaceAnalyzer: Send + Sync {
    fn analyze(&self, frame: &FrameSample) -> FaceAnalysis;

    fn name(&self) -> &str;
}

/// Fixed RGB skin-tone rule.
pub fn is_skin_tone(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (i16::from(r), i16::from(g), i16::from(b));
    let spread = r.max(g).max(b) - r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && spread > 15 && (r - g).abs() > 15 && r > g && r > b
}

/// Colour-heuristic analyzer. See the module docs for its limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer {
    params: AnalyzerParams,
}

impl HeuristicAnalyzer {
    pub fn new(params: AnalyzerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AnalyzerParams {
        &self.params
    }
}

impl FaceAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, frame: &FrameSample) -> FaceAnalysis {
        let p = &self.params;
        let (width, height) = (frame.width(), frame.height());
        let radius = width.min(height) / p.roi_divisor.max(1);
        if radius == 0 {
            return FaceAnalysis::EMPTY;
        }

        let (cx, cy) = (width / 2, height / 2);
        let x0 = cx.saturating_sub(radius);
        let x1 = (cx + radius).min(width);
        let y0 = cy.saturating_sub(radius);
        let y1 = (cy + radius).min(height);

        let mut brightness_sum = 0.0f64;
        let mut skin_pixels = 0u32;
        let mut roi_pixels = 0u32;
        for y in y0..y1 {
            for x in x0..x1 {
                let [r, g, b] = frame.pixel(x, y);
                brightness_sum += (u32::from(r) + u32::from(g) + u32::from(b)) as f64 / 3.0;
                if is_skin_tone(r, g, b) {
                    skin_pixels += 1;
                }
                roi_pixels += 1;
            }
        }
        if roi_pixels == 0 {
            return FaceAnalysis::EMPTY;
        }

        let skin_ratio = skin_pixels as f32 / roi_pixels as f32;
        let brightness = (brightness_sum / f64::from(roi_pixels)) as f32;
        let in_band = p.brightness_in_band(brightness);

        // Light outside the band contributes nothing: a black or blown-out
        // frame scores zero.
        let light_term = if in_band {
            brightness / 255.0 * p.brightness_weight
        } else {
            0.0
        };
        let quality = (skin_ratio * p.skin_weight + light_term).clamp(0.0, 100.0);

        FaceAnalysis {
            face_present: skin_ratio > p.min_skin_ratio && in_band,
            quality,
            brightness,
            skin_ratio,
        }
    }

    fn name(&self) -> &str {
        "heuristic-skin-tone"
    }
}

/// Something the user can fix about the capture conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    TooDark,
    TooBright,
    LowContrast,
    MoveCloser,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            QualityIssue::TooDark => "Improve the lighting, the image is too dark",
            QualityIssue::TooBright => "Reduce the lighting, the image is too bright",
            QualityIssue::LowContrast => "Increase the contrast",
            QualityIssue::MoveCloser => "Move closer to the camera",
        };
        f.write_str(text)
    }
}

/// Whole-frame lighting grade from [`assess_quality`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Score in `[0, 100]`.
    pub quality: f32,
    /// Mean brightness over every pixel, `[0, 255]`.
    pub brightness: f32,
    /// Mean distance of pixel brightness from mid-grey, `[0, 128]`.
    pub contrast: f32,
    pub issues: Vec<QualityIssue>,
}

/// Grade the lighting and contrast of a whole frame.
///
/// Starts from 50. A comfortable mean brightness (80..180, exclusive) adds
/// 25, an extreme one (below 50 or above 200) takes 20 away, and moderate
/// contrast (20..80, exclusive) adds 25.
pub fn assess_quality(frame: &FrameSample) -> QualityReport {
    let pixels = frame.data().chunks_exact(3);
    let count = pixels.len().max(1) as f64;
    let (brightness_sum, contrast_sum) = pixels.fold((0.0f64, 0.0f64), |(b, c), px| {
        let value = (f64::from(px[0]) + f64::from(px[1]) + f64::from(px[2])) / 3.0;
        (b + value, c + (value - 128.0).abs())
    });
    let brightness = (brightness_sum / count) as f32;
    let contrast = (contrast_sum / count) as f32;

    let mut quality = 50.0f32;
    if brightness > 80.0 && brightness < 180.0 {
        quality += 25.0;
    } else if brightness < 50.0 || brightness > 200.0 {
        quality -= 20.0;
    }
    if contrast > 20.0 && contrast < 80.0 {
        quality += 25.0;
    }
    let quality = quality.clamp(0.0, 100.0);

    let mut issues = Vec::new();
    if brightness < 80.0 {
        issues.push(QualityIssue::TooDark);
    }
    if brightness > 180.0 {
        issues.push(QualityIssue::TooBright);
    }
    if contrast < 20.0 {
        issues.push(QualityIssue::LowContrast);
    }
    if quality < 60.0 {
        issues.push(QualityIssue::MoveCloser);
    }

    QualityReport {
        quality,
        brightness,
        contrast,
        issues,
    }
}

/// Shared, cheaply cloneable reference to the analyzer in use.
///
/// Created once and passed to every session that needs it; there is no
/// global analyzer state.
#[derive(Clone)]
pub struct AnalyzerHandle(Arc<dyn FaceAnalyzer>);

impl AnalyzerHandle {
    pub fn new(analyzer: impl FaceAnalyzer + 'static) -> Self {
        Self(Arc::new(analyzer))
    }

    pub fn heuristic(params: AnalyzerParams) -> Self {
        Self::new(HeuristicAnalyzer::new(params))
    }

    pub fn analyze(&self, frame: &FrameSample) -> FaceAnalysis {
        self.0.analyze(frame)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl fmt::Debug for AnalyzerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnalyzerHandle").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SKIN: [u8; 3] = [200, 140, 110];
    const GREY: [u8; 3] = [128, 128, 128];

    fn solid(rgb: [u8; 3]) -> FrameSample {
        let data = rgb.iter().copied().cycle().take(160 * 120 * 3).collect();
        FrameSample::from_rgb(data, 160, 120).unwrap()
    }

    /// Grey frame with a 40x40 skin patch in the centre.
    fn face_frame() -> FrameSample {
        let mut data = Vec::with_capacity(160 * 120 * 3);
        for y in 0..120u32 {
            for x in 0..160u32 {
                let inside = (60..100).contains(&x) && (40..80).contains(&y);
                data.extend_from_slice(if inside { &SKIN } else { &GREY });
            }
        }
        FrameSample::from_rgb(data, 160, 120).unwrap()
    }

    fn noise_frame(seed: u64) -> FrameSample {
        let mut data = vec![0u8; 160 * 120 * 3];
        StdRng::seed_from_u64(seed).fill(&mut data[..]);
        FrameSample::from_rgb(data, 160, 120).unwrap()
    }

    /// Centred square skin patch of half-size `half` on a backdrop with the
    /// same mean brightness as the skin colour.
    fn patch_frame(half: u32) -> FrameSample {
        const LEVEL: [u8; 3] = [150, 150, 150];
        let mut data = Vec::with_capacity(160 * 120 * 3);
        for y in 0..120u32 {
            for x in 0..160u32 {
                let inside = x + half >= 80 && x < 80 + half && y + half >= 60 && y < 60 + half;
                data.extend_from_slice(if inside { &SKIN } else { &LEVEL });
            }
        }
        FrameSample::from_rgb(data, 160, 120).unwrap()
    }

    /// Left half `dark`, right half `light`.
    fn split_frame(dark: u8, light: u8) -> FrameSample {
        let mut data = Vec::with_capacity(160 * 120 * 3);
        for _ in 0..120u32 {
            for x in 0..160u32 {
                let v = if x < 80 { dark } else { light };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        FrameSample::from_rgb(data, 160, 120).unwrap()
    }

    #[test]
    fn test_skin_tone_rule() {
        assert!(is_skin_tone(200, 140, 110));
        assert!(!is_skin_tone(128, 128, 128)); // no spread
        assert!(!is_skin_tone(90, 50, 30)); // r too low
        assert!(!is_skin_tone(120, 110, 60)); // r - g too small
        assert!(!is_skin_tone(150, 100, 160)); // b dominates
    }

    #[test]
    fn test_black_frame_is_empty() {
        let a = HeuristicAnalyzer::default().analyze(&solid([0, 0, 0]));
        assert!(!a.face_present);
        assert_eq!(a.quality, 0.0);
        assert_eq!(a.skin_ratio, 0.0);
    }

    #[test]
    fn test_white_frame_is_empty() {
        let a = HeuristicAnalyzer::default().analyze(&solid([255, 255, 255]));
        assert!(!a.face_present);
        assert_eq!(a.quality, 0.0);
        assert_eq!(a.brightness, 255.0);
    }

    #[test]
    fn test_centered_face_scores_in_expected_band() {
        let a = HeuristicAnalyzer::default().analyze(&face_frame());
        assert!(a.face_present);
        // 1600 of 3600 ROI pixels are skin
        assert!((a.skin_ratio - 1600.0 / 3600.0).abs() < 1e-6);
        assert!(a.quality > 70.0 && a.quality < 95.0, "quality {}", a.quality);
    }

    #[test]
    fn test_narrow_roi_sees_only_skin() {
        let a = HeuristicAnalyzer::new(AnalyzerParams::narrow()).analyze(&face_frame());
        // Half-size 20 around (80, 60) lies entirely inside the skin patch
        assert_eq!(a.skin_ratio, 1.0);
        assert_eq!(a.quality, 100.0);
        assert!(a.face_present);
    }

    #[test]
    fn test_grey_frame_has_no_face_but_nonzero_quality() {
        let a = HeuristicAnalyzer::default().analyze(&solid(GREY));
        assert!(!a.face_present);
        assert!((a.quality - 128.0 / 255.0 * 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let analyzer = HeuristicAnalyzer::default();
        let frame = noise_frame(7);
        assert_eq!(analyzer.analyze(&frame), analyzer.analyze(&frame));
    }

    #[test]
    fn test_quality_bounded_for_degenerate_and_noisy_input() {
        let frames = [
            solid([0, 0, 0]),
            solid([255, 255, 255]),
            solid(SKIN),
            noise_frame(1),
            noise_frame(0xdead_beef),
        ];
        for params in [AnalyzerParams::wide(), AnalyzerParams::narrow()] {
            let analyzer = HeuristicAnalyzer::new(params);
            for frame in &frames {
                let a = analyzer.analyze(frame);
                assert!((0.0..=100.0).contains(&a.quality), "quality {}", a.quality);
                assert!((0.0..=1.0).contains(&a.skin_ratio));
                assert!((0.0..=255.0).contains(&a.brightness));
            }
        }
    }

    #[test]
    fn test_quality_rises_with_skin_ratio() {
        let analyzer = HeuristicAnalyzer::default();
        let mut prev: Option<FaceAnalysis> = None;
        for half in (0..=30).step_by(3) {
            let a = analyzer.analyze(&patch_frame(half));
            assert!((a.brightness - 150.0).abs() < 1e-3, "brightness {}", a.brightness);
            if let Some(p) = prev {
                assert!(a.skin_ratio > p.skin_ratio);
                assert!(a.quality >= p.quality);
                if p.quality < 100.0 {
                    assert!(a.quality > p.quality, "{} then {}", p.quality, a.quality);
                }
            }
            prev = Some(a);
        }
        assert_eq!(prev.map(|a| a.skin_ratio), Some(1.0));
    }

    #[test]
    fn test_assess_balanced_frame() {
        // brightness 128, contrast 40
        let report = assess_quality(&split_frame(88, 168));
        assert!((report.brightness - 128.0).abs() < 1e-3);
        assert!((report.contrast - 40.0).abs() < 1e-3);
        assert_eq!(report.quality, 100.0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_assess_flat_grey_lacks_contrast() {
        let report = assess_quality(&solid(GREY));
        assert_eq!(report.contrast, 0.0);
        assert_eq!(report.quality, 75.0);
        assert_eq!(report.issues, vec![QualityIssue::LowContrast]);
    }

    #[test]
    fn test_assess_dark_and_bright_frames() {
        let dark = assess_quality(&solid([30, 30, 30]));
        assert_eq!(dark.quality, 30.0);
        assert_eq!(dark.issues, vec![QualityIssue::TooDark, QualityIssue::MoveCloser]);

        // contrast 82 is outside the bonus band
        let bright = assess_quality(&solid([210, 210, 210]));
        assert_eq!(bright.quality, 30.0);
        assert_eq!(bright.issues, vec![QualityIssue::TooBright, QualityIssue::MoveCloser]);

        // brightness 60: no bonus, no penalty
        let dim = assess_quality(&split_frame(20, 100));
        assert!((dim.contrast - 68.0).abs() < 1e-3);
        assert_eq!(dim.quality, 75.0);
        assert_eq!(dim.issues, vec![QualityIssue::TooDark]);
    }

    #[test]
    fn test_assess_black_frame() {
        let report = assess_quality(&solid([0, 0, 0]));
        assert_eq!(report.brightness, 0.0);
        assert_eq!(report.contrast, 128.0);
        assert_eq!(report.quality, 30.0);
        assert_eq!(report.issues, vec![QualityIssue::TooDark, QualityIssue::MoveCloser]);
        assert_eq!(QualityIssue::MoveCloser.to_string(), "Move closer to the camera");
    }

    #[test]
    fn test_tiny_frame_is_empty() {
        let frame = FrameSample::from_rgb(vec![200, 140, 110], 1, 1).unwrap();
        assert_eq!(HeuristicAnalyzer::default().analyze(&frame), FaceAnalysis::EMPTY);
    }

    #[test]
    fn test_handle_delegates() {
        let handle = AnalyzerHandle::heuristic(AnalyzerParams::wide());
        assert_eq!(handle.name(), "heuristic-skin-tone");
        assert!(handle.analyze(&face_frame()).face_present);
        assert!(format!("{handle:?}").contains("heuristic-skin-tone"));
    }
}
