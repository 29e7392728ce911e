//! Live-channel event decoding.
//!
//! Payloads are JSON objects tagged by an `event` field. Three tags are
//! understood; anything else is skipped. A payload that is not JSON, or
//! that carries a known tag with the wrong shape, is a
//! [`CountError::MalformedEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CountError, Result};

/// Frame progress attached to `general_update` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed_frames: u64,
    pub total_frames: u64,
}

impl Progress {
    /// Fraction done in `[0, 1]`, `None` if the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total_frames > 0)
            .then(|| (self.processed_frames as f64 / self.total_frames as f64).min(1.0))
    }
}

/// A decoded live event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// An object crossed the line. `detail` is absent when the server sent none.
    ObjectCounted {
        total_count: u64,
        detail: Option<Value>,
    },
    /// Periodic running total.
    GeneralUpdate {
        total_count: u64,
        progress: Option<Progress>,
    },
    /// Processing finished; `output_path` locates the annotated video.
    VideoEnded {
        total_count: u64,
        output_path: Option<String>,
    },
}

impl LiveEvent {
    #[must_use]
    pub fn total_count(&self) -> u64 {
        match self {
            Self::ObjectCounted { total_count, .. }
            | Self::GeneralUpdate { total_count, .. }
            | Self::VideoEnded { total_count, .. } => *total_count,
        }
    }

    /// Wire tag of this event.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ObjectCounted { .. } => "object_counted",
            Self::GeneralUpdate { .. } => "general_update",
            Self::VideoEnded { .. } => "video_ended",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::VideoEnded { .. })
    }

    /// Decode one payload. `Ok(None)` for well-formed events with an unknown tag.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CountError::MalformedEvent(format!("not JSON: {e}")))?;
        let tag = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| CountError::MalformedEvent("missing `event` tag".to_string()))?
            .to_string();

        if !matches!(
            tag.as_str(),
            "object_counted" | "general_update" | "video_ended"
        ) {
            return Ok(None);
        }

        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| CountError::MalformedEvent(format!("{tag}: {e}")))?;

        let event = match tag.as_str() {
            "object_counted" => Self::ObjectCounted {
                total_count: wire.total_count,
                detail: wire.detail.or_else(|| remaining_fields(wire.rest)),
            },
            "general_update" => Self::GeneralUpdate {
                total_count: wire.total_count,
                progress: wire
                    .processed_frames
                    .zip(wire.total_frames)
                    .map(|(processed_frames, total_frames)| Progress {
                        processed_frames,
                        total_frames,
                    }),
            },
            _ => Self::VideoEnded {
                total_count: wire.total_count,
                output_path: wire.path.or(wire.processed_video_url),
            },
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    total_count: u64,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    processed_video_url: Option<String>,
    #[serde(default)]
    processed_frames: Option<u64>,
    #[serde(default)]
    total_frames: Option<u64>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Counting details sent at top level (`object_id`, `object_label`, ...).
fn remaining_fields(mut rest: Map<String, Value>) -> Option<Value> {
    rest.remove("event");
    (!rest.is_empty()).then_some(Value::Object(rest))
}
