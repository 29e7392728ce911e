//! Processing session state machine.
//!
//! The controller is plain `&mut self` state. It never performs I/O: the
//! caller reports what happened (file chosen, dimensions probed, request
//! acknowledged, live notification received) and reads back status, counters
//! and the submission to send.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::classes::{ClassSelection, ModelClass};
use super::history::RingBuffer;
use super::submission::{ModelSource, Submission, TrackerParams, DEFAULT_TRACKER};
use crate::error::{CountError, Result};
use crate::live::{ClientNotification, LiveEvent, Progress};
use crate::overlay::{CountingLine, LineAnnotator, Point, VideoFrameGeometry};

/// Lifecycle of one processing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    VideoLoaded,
    Submitting,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::VideoLoaded => "video loaded",
            Self::Submitting => "submitting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Top-level state for one operator session.
pub struct ProcessingSessionController {
    status: SessionStatus,
    video: Option<PathBuf>,
    annotator: LineAnnotator,
    model_source: ModelSource,
    model: Option<String>,
    tracker: String,
    params: TrackerParams,
    classes: ClassSelection,
    total_count: u64,
    details: RingBuffer<Value>,
    progress: Option<Progress>,
    output: Option<Url>,
    processed_videos: Url,
    active_session: Option<Uuid>,
    status_message: String,
    notice: Option<String>,
}

impl ProcessingSessionController {
    /// `processed_videos` is the base URL completed outputs are served under.
    #[must_use]
    pub fn new(processed_videos: Url) -> Self {
        Self {
            status: SessionStatus::Idle,
            video: None,
            annotator: LineAnnotator::new(),
            model_source: ModelSource::Standard,
            model: None,
            tracker: DEFAULT_TRACKER.to_string(),
            params: TrackerParams::default(),
            classes: ClassSelection::default(),
            total_count: 0,
            details: RingBuffer::default(),
            progress: None,
            output: None,
            processed_videos,
            active_session: None,
            status_message: "Ready".to_string(),
            notice: None,
        }
    }

    // ── Inputs ─────────────────────────────────────────────────────────────

    /// A new local video was chosen. Valid from any state.
    pub fn select_video(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if matches!(
            self.status,
            SessionStatus::Submitting | SessionStatus::Processing
        ) {
            info!(previous = ?self.video, "new video selected while a job is in flight");
        }
        self.video = Some(path);
        self.status = SessionStatus::VideoLoaded;
        self.annotator.reload();
        self.reset_counters();
        self.output = None;
        self.active_session = None;
        self.notice = None;
        self.status_message = "Video loaded, ready to process.".to_string();
    }

    /// The video's dimensions became known. Unready geometry is not an error
    /// for the operator; the overlay just stays inert.
    pub fn video_dimensions_known(&mut self, geometry: VideoFrameGeometry) -> bool {
        match self.annotator.calibrate(geometry) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "overlay not calibrated");
                false
            }
        }
    }

    pub fn pointer_down(&mut self, display_point: Point) {
        self.annotator.begin_drag(display_point);
    }

    pub fn pointer_move(&mut self, display_point: Point) {
        self.annotator.update_drag(display_point);
    }

    pub fn pointer_up(&mut self) {
        self.annotator.end_drag();
    }

    pub fn set_model_source(&mut self, source: ModelSource) {
        if self.model_source != source {
            self.model_source = source;
            self.model = None;
            self.classes.set_catalog(Vec::new());
        }
    }

    /// Select a model. The class catalog must be refreshed for it.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
        self.classes.set_catalog(Vec::new());
    }

    pub fn set_tracker(&mut self, tracker: impl Into<String>) {
        self.tracker = tracker.into();
    }

    pub fn set_tracker_params(&mut self, params: TrackerParams) {
        self.params = params;
    }

    pub fn set_class_catalog(&mut self, catalog: Vec<ModelClass>) {
        self.classes.set_catalog(catalog);
    }

    pub fn select_all_classes(&mut self) {
        self.classes.select_all();
    }

    pub fn deselect_all_classes(&mut self) {
        self.classes.deselect_all();
    }

    pub fn toggle_class(&mut self, id: u32, included: bool) -> bool {
        self.classes.toggle(id, included)
    }

    // ── Submission ─────────────────────────────────────────────────────────

    /// Freeze the current selections into a [`Submission`] and move to
    /// `Submitting`. Guard failures leave the status untouched.
    pub fn prepare_submission(&mut self) -> Result<Submission> {
        let Some(video) = self.video.clone() else {
            return Err(CountError::InvalidLocalSelection(
                "select a video first".to_string(),
            ));
        };
        if self.status != SessionStatus::VideoLoaded {
            return Err(CountError::InvalidState(format!(
                "cannot submit while {}",
                self.status
            )));
        }
        let model_name = match (self.model_source, self.model.as_deref()) {
            (ModelSource::CustomUploaded, Some(m)) if m.contains(".pt") => m.to_string(),
            (ModelSource::CustomUploaded, _) => {
                return Err(CountError::InvalidLocalSelection(
                    "select an uploaded .pt model first".to_string(),
                ))
            }
            (ModelSource::Standard, Some(m)) if !m.trim().is_empty() => m.to_string(),
            (ModelSource::Standard, _) => {
                return Err(CountError::InvalidLocalSelection(
                    "select a model first".to_string(),
                ))
            }
        };
        if self.tracker.trim().is_empty() {
            return Err(CountError::InvalidLocalSelection(
                "select a tracker first".to_string(),
            ));
        }
        self.params.validate()?;

        let session_id = Uuid::new_v4();
        let submission = Submission {
            session_id,
            video,
            model_name,
            tracker_name: self.tracker.clone(),
            line: self.annotator.current_line().to_pixel_pairs(),
            class_ids: self.classes.selected_ids(),
            params: self.params,
        };
        info!(
            session = %session_id,
            model = %submission.model_name,
            tracker = %submission.tracker_name,
            line = ?submission.line,
            "submitting video"
        );
        self.active_session = Some(session_id);
        self.status = SessionStatus::Submitting;
        self.output = None;
        self.notice = None;
        self.status_message = "Processing video...".to_string();
        Ok(submission)
    }

    /// The processing service accepted `session_id`.
    ///
    /// Returns `true` if this moved the session to `Processing`. Stale or
    /// late acknowledgments are ignored.
    pub fn submission_acknowledged(&mut self, session_id: Uuid) -> bool {
        if !self.is_active(session_id) {
            debug!(session = %session_id, "acknowledgment for a stale session ignored");
            return false;
        }
        if self.status != SessionStatus::Submitting {
            debug!(session = %session_id, status = %self.status, "late acknowledgment ignored");
            return false;
        }
        self.enter_processing();
        true
    }

    /// The request for `session_id` failed. Returns `true` if the session
    /// moved to `Failed`.
    pub fn submission_failed(&mut self, session_id: Uuid, error: &CountError) -> bool {
        if !self.is_active(session_id)
            || !matches!(
                self.status,
                SessionStatus::Submitting | SessionStatus::Processing
            )
        {
            debug!(session = %session_id, error = %error, "failure for an inactive session ignored");
            return false;
        }
        warn!(session = %session_id, error = %error, "processing request failed");
        let message = match error {
            CountError::SubmissionRejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.status = SessionStatus::Failed;
        self.status_message = format!("Error: {message}");
        self.notice = Some(message);
        true
    }

    /// The operator saw the failure; allow resubmission.
    pub fn acknowledge_failure(&mut self) -> Result<()> {
        if self.status != SessionStatus::Failed {
            return Err(CountError::InvalidState(format!(
                "no failure to acknowledge while {}",
                self.status
            )));
        }
        self.status = SessionStatus::VideoLoaded;
        self.active_session = None;
        self.status_message = "Video loaded, ready to process.".to_string();
        Ok(())
    }

    // ── Live events ────────────────────────────────────────────────────────

    /// Merge one live event. Returns `true` if it was applied.
    pub fn apply_event(&mut self, event: LiveEvent) -> bool {
        match self.status {
            SessionStatus::Processing => {}
            SessionStatus::Submitting => {
                debug!(event = event.tag(), "event before acknowledgment, treating as processing");
                self.enter_processing();
            }
            status => {
                debug!(event = event.tag(), %status, "event ignored");
                return false;
            }
        }

        let tag = event.tag();
        match event {
            LiveEvent::ObjectCounted {
                total_count,
                detail,
            } => {
                self.total_count = total_count;
                if let Some(detail) = detail {
                    self.details.push(detail);
                }
            }
            LiveEvent::GeneralUpdate {
                total_count,
                progress,
            } => {
                self.total_count = total_count;
                if progress.is_some() {
                    self.progress = progress;
                }
            }
            LiveEvent::VideoEnded {
                total_count,
                output_path,
            } => {
                self.total_count = total_count;
                self.output = output_path
                    .as_deref()
                    .and_then(|p| output_reference(&self.processed_videos, p));
                self.status = SessionStatus::Completed;
                self.status_message = format!("Processing complete! Final count: {total_count}");
                self.notice = Some(match &self.output {
                    Some(url) => format!("Processed video ready at {url}"),
                    None => "Processed video ready".to_string(),
                });
                info!(total_count, output = ?self.output.as_ref().map(Url::as_str), "processing complete");
                return true;
            }
        }
        self.status_message = format!("Total count: {} (last event: {tag})", self.total_count);
        true
    }

    /// Merge a notification from the live client.
    pub fn apply_notification(&mut self, notification: ClientNotification) -> bool {
        match notification {
            ClientNotification::Event(event) => self.apply_event(event),
            ClientNotification::Opened => {
                debug!("live channel open");
                false
            }
            ClientNotification::Diagnostic(message) => {
                debug!(%message, "live channel diagnostic");
                false
            }
            ClientNotification::Closed { reconnect_in } => {
                if let Some(delay) = reconnect_in {
                    self.status_message = format!(
                        "Live connection lost, reconnecting in {}s",
                        delay.as_secs()
                    );
                }
                false
            }
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Last completion or failure message.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Recent `object_counted` details, oldest first.
    #[must_use]
    pub fn details(&self) -> &RingBuffer<Value> {
        &self.details
    }

    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        self.progress
    }

    #[must_use]
    pub fn output(&self) -> Option<&Url> {
        self.output.as_ref()
    }

    #[must_use]
    pub fn video(&self) -> Option<&Path> {
        self.video.as_deref()
    }

    #[must_use]
    pub fn line(&self) -> CountingLine {
        self.annotator.current_line()
    }

    #[must_use]
    pub fn annotator(&self) -> &LineAnnotator {
        &self.annotator
    }

    #[must_use]
    pub fn classes(&self) -> &ClassSelection {
        &self.classes
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<Uuid> {
        self.active_session
    }

    fn is_active(&self, session_id: Uuid) -> bool {
        self.active_session == Some(session_id)
    }

    fn enter_processing(&mut self) {
        self.status = SessionStatus::Processing;
        self.reset_counters();
        self.status_message = "Processing video...".to_string();
    }

    fn reset_counters(&mut self) {
        self.total_count = 0;
        self.details.clear();
        self.progress = None;
    }
}

/// Playable URL for a backend output path: its last segment, percent-encoded,
/// under `processed_videos`.
#[must_use]
pub fn output_reference(processed_videos: &Url, output_path: &str) -> Option<Url> {
    let segment = output_path.rsplit(['/', '\\']).next()?;
    if matches!(segment, "" | "." | "..") {
        return None;
    }
    processed_videos
        .join(&urlencoding::encode(segment))
        .ok()
}
