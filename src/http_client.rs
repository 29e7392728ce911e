//! REST client for the counting server.
//!
//! Catalog and history calls share one pooled [`reqwest::Client`] with a
//! per-request timeout. The processing call has no overall timeout: its
//! response is a long-lived stream that ends when the backend finishes.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{CountError, Result};
use crate::mjpeg::{boundary_from_content_type, DEFAULT_BOUNDARY};
use crate::session::{output_reference, validate_model_file, ModelClass, Submission};

/// One row of `GET /last-10-counts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRecord {
    pub id: i64,
    #[serde(default)]
    pub video_name: String,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub tracker_used: String,
    pub final_count: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default)]
    pub line_coordinates: Option<Value>,
    pub processed_video_path: Option<String>,
}

impl CountRecord {
    #[must_use]
    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.start_time.as_deref().and_then(parse_timestamp)
    }

    /// Wall time the backend spent on the video.
    #[must_use]
    pub fn elapsed(&self) -> Option<TimeDelta> {
        let end = self.end_time.as_deref().and_then(parse_timestamp)?;
        Some(end - self.started_at()?)
    }

    #[must_use]
    pub fn playable_url(&self, processed_videos: &Url) -> Option<Url> {
        output_reference(processed_videos, self.processed_video_path.as_deref()?)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok())
}

#[derive(Deserialize)]
struct ModelsResponse {
    supported_models: Vec<String>,
}

#[derive(Deserialize)]
struct TrackersResponse {
    supported_trackers: Vec<String>,
}

#[derive(Deserialize)]
struct CustomModelsResponse {
    #[serde(default)]
    custom_models: Vec<String>,
}

#[derive(Deserialize)]
struct ClassesResponse {
    classes: Vec<ModelClass>,
}

#[derive(Deserialize)]
struct UploadResponse {
    message: String,
}

/// Shape of a successful processing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedBody {
    /// The annotated video itself.
    Video,
    /// Live JPEG previews, one multipart part per frame.
    Mjpeg { boundary: String },
}

impl ProcessedBody {
    /// Classify a `Content-Type`. `None` for anything that isn't video.
    #[must_use]
    pub fn classify(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.starts_with("video/") {
            Some(Self::Video)
        } else if essence == "multipart/x-mixed-replace" {
            Some(Self::Mjpeg {
                boundary: boundary_from_content_type(content_type)
                    .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string()),
            })
        } else {
            None
        }
    }
}

/// Streaming body of an accepted processing request.
pub struct ProcessedStream {
    kind: ProcessedBody,
    content_type: String,
    response: Response,
    received: u64,
}

impl ProcessedStream {
    #[must_use]
    pub fn kind(&self) -> &ProcessedBody {
        &self.kind
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Next body chunk; `None` once the backend closes the stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let chunk = self.response.chunk().await?;
        if let Some(c) = &chunk {
            self.received += c.len() as u64;
        }
        Ok(chunk)
    }
}

/// HTTP client bound to one server.
pub struct ApiClient {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl ApiClient {
    /// `base` must end in `/`; endpoints are resolved relative to it.
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            // ═══════════════════════════════════════════════════════════════
            // CONNECTION
            // ═══════════════════════════════════════════════════════════════
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .gzip(true)
            .user_agent(concat!("linecount/", env!("CARGO_PKG_VERSION")))
            // ═══════════════════════════════════════════════════════════════
            // TIMEOUTS (request timeouts are set per call)
            // ═══════════════════════════════════════════════════════════════
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.server_url()?, config.request_timeout())
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    /// Base URL processed videos are served under.
    pub fn processed_videos_url(&self) -> Result<Url> {
        self.endpoint("processed-videos/")
    }

    pub async fn models(&self) -> Result<Vec<String>> {
        let body: ModelsResponse = self.get_json("models").await?;
        Ok(body.supported_models)
    }

    pub async fn trackers(&self) -> Result<Vec<String>> {
        let body: TrackersResponse = self.get_json("trackers").await?;
        Ok(body.supported_trackers)
    }

    pub async fn custom_models(&self) -> Result<Vec<String>> {
        let body: CustomModelsResponse = self.get_json("custom-models").await?;
        Ok(body.custom_models)
    }

    pub async fn model_classes(&self, model: &str) -> Result<Vec<ModelClass>> {
        let path = format!("model-classes/{}", urlencoding::encode(model));
        let body: ClassesResponse = self.get_json(&path).await?;
        Ok(body.classes)
    }

    pub async fn last_counts(&self) -> Result<Vec<CountRecord>> {
        self.get_json("last-10-counts").await
    }

    /// Upload a custom `.pt` model. Other extensions are refused before any
    /// network traffic.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_model(&self, path: &Path) -> Result<String> {
        let file_name = validate_model_file(path)?;
        let part = file_part(path, file_name.clone(), "application/octet-stream").await?;
        let form = Form::new().part("model_file", part);

        let response = self
            .client
            .post(self.endpoint("upload-model/")?)
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = check(response).await?.json().await?;
        info!(model = %file_name, "model uploaded");
        Ok(body.message)
    }

    /// Submit a video for processing.
    ///
    /// Any success response that is not a video or a multipart preview
    /// stream is a [`CountError::SubmissionRejected`].
    #[instrument(skip_all, fields(session = %submission.session_id))]
    pub async fn process_video(&self, submission: &Submission) -> Result<ProcessedStream> {
        let file_name = submission
            .video
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CountError::InvalidLocalSelection(format!(
                    "no file name in {}",
                    submission.video.display()
                ))
            })?
            .to_string();
        let video = file_part(&submission.video, file_name, video_mime(&submission.video)).await?;

        let mut form = Form::new().part("video_file", video);
        for (name, value) in submission.form_fields()? {
            form = form.text(name, value);
        }

        let url = self.endpoint("process-video/")?;
        debug!(%url, "POST");
        let response = check(self.client.post(url).multipart(form).send().await?).await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let Some(kind) = ProcessedBody::classify(&content_type) else {
            let body = response.text().await.unwrap_or_default();
            return Err(CountError::rejected(
                status,
                format!(
                    "unexpected `{content_type}` response: {}",
                    error_message(&body, status)
                ),
            ));
        };
        info!(content_type = %content_type, "processing accepted");
        Ok(ProcessedStream {
            kind,
            content_type,
            response,
            received: 0,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turn a non-success response into [`CountError::SubmissionRejected`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CountError::rejected(status, error_message(&body, status)))
}

/// Best human-readable message in an error body: the server's `detail` or
/// `error` field, else the raw text, else the status reason.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "message"] {
            match map.get(key) {
                Some(Value::String(s)) => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    let text = body.trim();
    if text.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| status.to_string(), str::to_string)
    } else {
        text.to_string()
    }
}

/// Multipart part that streams `path` from disk with a known length.
async fn file_part(path: &Path, file_name: String, mime: &str) -> Result<Part> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    debug!(path = %path.display(), bytes = len, "streaming file part");
    Ok(Part::stream_with_length(reqwest::Body::from(file), len)
        .file_name(file_name)
        .mime_str(mime)?)
}

fn video_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
