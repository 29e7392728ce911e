//! Intrinsic video dimensions via ffprobe.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CountError, Result};
use crate::overlay::{DisplayRect, VideoFrameGeometry};

/// What the overlay needs to know about a video file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoDimensions {
    /// Width as displayed, after applying rotation metadata.
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub duration: Option<f64>,
}

impl VideoDimensions {
    /// Geometry with the video shown in `display`.
    #[must_use]
    pub fn geometry(&self, display: DisplayRect) -> VideoFrameGeometry {
        VideoFrameGeometry::new(f64::from(self.width), f64::from(self.height), display)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: Option<StreamTags>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct StreamTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Runs `ffprobe` against local files.
#[derive(Debug, Clone)]
pub struct VideoProbe {
    ffprobe: PathBuf,
}

impl VideoProbe {
    /// Find `ffprobe` in `PATH`.
    pub fn locate() -> Result<Self> {
        let ffprobe = which::which("ffprobe")
            .map_err(|e| CountError::Probe(format!("ffprobe not found in PATH: {e}")))?;
        Ok(Self { ffprobe })
    }

    #[must_use]
    pub fn with_binary(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    pub async fn dimensions(&self, video_path: &Path) -> Result<VideoDimensions> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CountError::Probe(format!(
                "ffprobe failed on {}",
                video_path.display()
            )));
        }
        let dims = parse_probe_output(&output.stdout)?;
        debug!(path = %video_path.display(), width = dims.width, height = dims.height, "probed video");
        Ok(dims)
    }
}

/// Decode ffprobe's JSON into the first video stream's dimensions.
pub fn parse_probe_output(stdout: &[u8]) -> Result<VideoDimensions> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| CountError::Probe("no video stream found".to_string()))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(CountError::Probe("video stream has no dimensions".to_string()));
    };

    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|d| d.rotation)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.parse().ok())
        })
        .unwrap_or(0.0);
    let quarter_turn = (rotation.abs() % 180.0 - 90.0).abs() < 1.0;
    let (width, height) = if quarter_turn {
        (height, width)
    } else {
        (width, height)
    };

    // "30000/1001" or "25"
    let fps = stream.r_frame_rate.as_deref().and_then(|r| match r.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => r.parse().ok(),
    });

    Ok(VideoDimensions {
        width,
        height,
        fps,
        duration: probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_video_stream() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "30000/1001"}
            ],
            "format": {"duration": "12.5"}
        }"#;
        let dims = parse_probe_output(json).unwrap();
        assert_eq!((dims.width, dims.height), (1920, 1080));
        assert!((dims.fps.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(dims.duration, Some(12.5));
    }

    #[test]
    fn rotation_swaps_axes() {
        let side = br#"{"streams": [{"codec_type": "video", "width": 1920, "height": 1080,
            "side_data_list": [{"rotation": -90}]}]}"#;
        let dims = parse_probe_output(side).unwrap();
        assert_eq!((dims.width, dims.height), (1080, 1920));

        let tag = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 480,
            "tags": {"rotate": "270"}}]}"#;
        let dims = parse_probe_output(tag).unwrap();
        assert_eq!((dims.width, dims.height), (480, 640));

        let flip = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 480,
            "tags": {"rotate": "180"}}]}"#;
        assert_eq!(parse_probe_output(flip).unwrap().width, 640);
    }

    #[test]
    fn audio_only_is_probe_error() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(parse_probe_output(json), Err(CountError::Probe(_))));
    }

    #[test]
    fn geometry_from_dimensions() {
        let dims = VideoDimensions {
            width: 1280,
            height: 720,
            fps: None,
            duration: None,
        };
        let g = dims.geometry(DisplayRect::sized(640.0, 360.0));
        assert!(g.is_ready());
        assert_eq!(g.scale().unwrap(), (2.0, 2.0));
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let probe = VideoProbe::with_binary("/nonexistent/ffprobe");
        assert!(matches!(
            probe.dimensions(Path::new("clip.mp4")).await,
            Err(CountError::Io(_))
        ));
    }
}
