//! What gets sent to `POST /process-video/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CountError, Result};

pub const DEFAULT_MODEL: &str = "yolov8n";
pub const DEFAULT_TRACKER: &str = "bytetrack";

/// Numeric tracker knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    pub conf_threshold: f64,
    pub iou_threshold: f64,
    pub track_buffer_frames: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.7,
            track_buffer_frames: 30,
        }
    }
}

impl TrackerParams {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence threshold", self.conf_threshold),
            ("IoU threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CountError::InvalidLocalSelection(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if self.track_buffer_frames == 0 {
            return Err(CountError::InvalidLocalSelection(
                "track buffer must be at least one frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the detection model comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSource {
    /// One of the server's built-in models.
    #[default]
    Standard,
    /// A `.pt` file the operator uploaded.
    CustomUploaded,
}

/// Reject anything but a `.pt` model before touching the network.
///
/// Returns the file name to register the model under.
pub fn validate_model_file(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CountError::InvalidLocalSelection(format!("no file name in {}", path.display())))?;
    if !name.ends_with(".pt") {
        return Err(CountError::InvalidLocalSelection(format!(
            "model file must have a .pt extension: {name}"
        )));
    }
    Ok(name.to_string())
}

/// A fully-resolved processing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Local id used to match acknowledgments to this request.
    pub session_id: Uuid,
    pub video: PathBuf,
    pub model_name: String,
    pub tracker_name: String,
    pub line: [[i64; 2]; 2],
    pub class_ids: Vec<u32>,
    pub params: TrackerParams,
}

impl Submission {
    /// Text fields of the multipart form, in wire order.
    pub fn form_fields(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("model_name", self.model_name.clone()),
            ("tracker_name", self.tracker_name.clone()),
            ("line_coordinates", serde_json::to_string(&self.line)?),
            ("selected_class_ids", serde_json::to_string(&self.class_ids)?),
            ("conf_threshold", self.params.conf_threshold.to_string()),
            ("iou_threshold", self.params.iou_threshold.to_string()),
            (
                "track_buffer_frames",
                self.params.track_buffer_frames.to_string(),
            ),
        ])
    }
}
