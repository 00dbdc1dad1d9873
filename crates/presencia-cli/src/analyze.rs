//! `presencia analyze` - scores still images the way a live frame is scored.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use presencia_core::{
    assess_quality, AnalyzerParams, FaceAnalysis, FaceAnalyzer, FrameSampler, HeuristicAnalyzer,
    QualityReport,
};
use presencia_hw::{CaptureConstraints, CaptureDevice, StillImageCamera};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Roi {
    /// Quarter-size region, moderate skin weight
    Wide,
    /// Sixth-size region, steep skin weight
    Narrow,
}

impl Roi {
    fn params(self) -> AnalyzerParams {
        match self {
            Roi::Wide => AnalyzerParams::wide(),
            Roi::Narrow => AnalyzerParams::narrow(),
        }
    }
}

pub fn run(images: &[PathBuf], roi: Roi) -> Result<()> {
    let analyzer = HeuristicAnalyzer::new(roi.params());
    for path in images {
        let (analysis, lighting) = analyze_file(&analyzer, path)?;
        let line = serde_json::json!({
            "image": path.display().to_string(),
            "analyzer": analyzer.name(),
            "analysis": analysis,
            "lighting": lighting,
        });
        println!("{line}");
    }
    Ok(())
}

fn analyze_file(analyzer: &HeuristicAnalyzer, path: &Path) -> Result<(FaceAnalysis, QualityReport)> {
    // Any image size is fine here; the camera minimum does not apply.
    let constraints = CaptureConstraints {
        min_width: 1,
        min_height: 1,
        ..CaptureConstraints::default()
    };
    let mut stream = StillImageCamera::new(path)
        .acquire(&constraints)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let frame = FrameSampler::default()
        .sample(stream.as_mut())
        .with_context(|| format!("no frame decoded from {}", path.display()))?;
    stream.stop();

    let analysis = analyzer.analyze(&frame);
    let lighting = assess_quality(&frame);
    tracing::debug!(
        image = %path.display(),
        face_present = analysis.face_present,
        quality = analysis.quality,
        lighting = lighting.quality,
        issues = lighting.issues.len(),
        "image analysed"
    );
    Ok((analysis, lighting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_image_is_an_error() {
        let analyzer = HeuristicAnalyzer::new(Roi::Narrow.params());
        let err = analyze_file(&analyzer, Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(err.to_string().contains("failed to load"), "{err}");
    }
}
