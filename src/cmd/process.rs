use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use linecount::overlay::{CanvasRenderer, DisplayRect, PixmapSurface, Point, VideoFrameGeometry};
use linecount::session::{validate_model_file, ModelSource, Submission};
use linecount::{
    ApiClient, ClientConfig, ClientNotification, CountError, LiveEventClient, MjpegSplitter,
    ProcessedBody, ProcessingSessionController, SessionStatus, VideoProbe,
};

use super::output::print_json;
use super::watch::report_notification;
use crate::{OutputFormat, ProcessArgs, Size};

/// How long to wait for `video_ended` once the response body has ended.
const COMPLETION_GRACE: Duration = Duration::from_secs(5);

/// Progress of the processing request, reported by the body task.
enum BodyEvent {
    Accepted { content_type: String },
    Finished { bytes: u64, frames: u64 },
    Failed(CountError),
}

#[derive(Serialize)]
struct Summary<'a> {
    session: String,
    status: String,
    total_count: u64,
    output: Option<&'a str>,
    recent: Vec<&'a Value>,
    bytes_received: u64,
    preview_frames: u64,
    elapsed_secs: f64,
}

pub async fn cmd_process(config: &ClientConfig, args: ProcessArgs, format: OutputFormat) -> Result<()> {
    anyhow::ensure!(
        args.video.is_file(),
        "video not found: {}",
        args.video.display()
    );
    if let Some(custom) = &args.custom_model {
        validate_model_file(Path::new(custom))?;
    }

    let api = Arc::new(ApiClient::from_config(config)?);
    let mut session = ProcessingSessionController::new(api.processed_videos_url()?);
    session.select_video(&args.video);

    let intrinsic = match args.intrinsic {
        Some(size) => size,
        None => {
            let probe = VideoProbe::locate().context("pass --intrinsic WxH to skip ffprobe")?;
            let dims = probe
                .dimensions(&args.video)
                .await
                .with_context(|| format!("failed to probe {}", args.video.display()))?;
            Size {
                width: f64::from(dims.width),
                height: f64::from(dims.height),
            }
        }
    };
    let display = args.display.unwrap_or(intrinsic);
    let geometry = VideoFrameGeometry::new(
        intrinsic.width,
        intrinsic.height,
        DisplayRect::sized(display.width, display.height),
    );
    anyhow::ensure!(
        session.video_dimensions_known(geometry),
        "unusable video dimensions {}x{}",
        intrinsic.width,
        intrinsic.height
    );

    // Replay the line as a pointer drag in display space
    let [x1, y1, x2, y2] = args.line;
    session.pointer_down(Point::new(x1, y1));
    session.pointer_move(Point::new(x2, y2));
    session.pointer_up();
    if session.line().is_degenerate() {
        warn!("counting line has zero length");
    }

    configure_model(&mut session, &api, config, &args).await?;

    if let Some(path) = &args.preview {
        render_preview(&session, path)?;
    }

    let (mut live, mut notifications) = if args.no_wait {
        (None, None)
    } else {
        let url = config.live_url()?;
        let mut client = LiveEventClient::websocket(url.as_str(), config.reconnect_policy());
        let rx = client.subscribe();
        client.connect();
        (Some(client), Some(rx))
    };

    let submission = session.prepare_submission()?;
    let session_id = submission.session_id;
    eprintln!(
        "🎬 {} · {} + {} · line {:?}",
        args.video.display(),
        submission.model_name,
        submission.tracker_name,
        submission.line
    );

    let (body_tx, mut body_rx) = mpsc::unbounded_channel();
    let body_task = tokio::spawn(drain_body(
        Arc::clone(&api),
        submission,
        args.output.clone(),
        body_tx,
    ));

    let started = Instant::now();
    let mut body_done = false;
    let mut grace: Option<Instant> = None;
    let mut interrupted = false;
    let mut received = (0, 0);

    loop {
        let status = session.status();
        if status == SessionStatus::Failed
            || (body_done && (status == SessionStatus::Completed || notifications.is_none()))
        {
            break;
        }

        tokio::select! {
            Some(event) = body_rx.recv() => match event {
                BodyEvent::Accepted { content_type } => {
                    debug!(%content_type, "processing response started");
                    session.submission_acknowledged(session_id);
                    eprintln!("⏳ {}", session.status_message());
                }
                BodyEvent::Finished { bytes, frames } => {
                    body_done = true;
                    received = (bytes, frames);
                    grace = Some(Instant::now() + COMPLETION_GRACE);
                }
                BodyEvent::Failed(error) => {
                    body_done = true;
                    session.submission_failed(session_id, &error);
                }
            },
            Some(notification) = next_notification(&mut notifications) => {
                report_notification(&notification, format)?;
                session.apply_notification(notification);
            }
            () = wait_until(grace) => {
                warn!("response ended without a video_ended event");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
    }

    body_task.abort();
    if let Some(client) = live.as_mut() {
        client.disconnect().await;
    }

    report_summary(&session, received, started.elapsed(), format)?;

    if session.status() == SessionStatus::Failed {
        anyhow::bail!("{}", session.notice().unwrap_or("processing failed"));
    }
    if interrupted {
        anyhow::bail!("interrupted");
    }
    Ok(())
}

async fn configure_model(
    session: &mut ProcessingSessionController,
    api: &ApiClient,
    config: &ClientConfig,
    args: &ProcessArgs,
) -> Result<()> {
    let model = match &args.custom_model {
        Some(custom) => {
            session.set_model_source(ModelSource::CustomUploaded);
            custom.clone()
        }
        None => args
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone()),
    };
    session.set_model(model.clone());
    session.set_tracker(
        args.tracker
            .clone()
            .unwrap_or_else(|| config.default_tracker.clone()),
    );

    let mut params = config.tracker;
    if let Some(conf) = args.conf {
        params.conf_threshold = conf;
    }
    if let Some(iou) = args.iou {
        params.iou_threshold = iou;
    }
    if let Some(frames) = args.track_buffer {
        params.track_buffer_frames = frames;
    }
    params.validate()?;
    session.set_tracker_params(params);

    if args.all_classes || !args.classes.is_empty() {
        let catalog = api
            .model_classes(&model)
            .await
            .with_context(|| format!("failed to list classes of {model}"))?;
        session.set_class_catalog(catalog);
        if args.all_classes {
            session.select_all_classes();
        } else {
            for token in &args.classes {
                let id = session
                    .classes()
                    .resolve(token)
                    .with_context(|| format!("unknown class `{token}` for {model}"))?;
                session.toggle_class(id, true);
            }
        }
    }
    Ok(())
}

fn render_preview(session: &ProcessingSessionController, path: &Path) -> Result<()> {
    let frame = session.annotator().frame();
    let geometry = frame.geometry.context("overlay is not calibrated")?;
    let mut surface = PixmapSurface::for_display(&geometry)?;
    CanvasRenderer::default().render_frame(&mut surface, &frame);
    surface
        .save_png(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("🖼️  Overlay preview saved to {}", path.display());
    Ok(())
}

async fn drain_body(
    api: Arc<ApiClient>,
    submission: Submission,
    output: Option<PathBuf>,
    tx: mpsc::UnboundedSender<BodyEvent>,
) {
    let event = match drain(&api, &submission, output.as_deref(), &tx).await {
        Ok((bytes, frames)) => BodyEvent::Finished { bytes, frames },
        Err(error) => BodyEvent::Failed(error),
    };
    let _ = tx.send(event);
}

/// Submit and read the response to its end. Returns bytes and preview
/// frames received.
async fn drain(
    api: &ApiClient,
    submission: &Submission,
    output: Option<&Path>,
    tx: &mpsc::UnboundedSender<BodyEvent>,
) -> linecount::Result<(u64, u64)> {
    let mut stream = api.process_video(submission).await?;
    let _ = tx.send(BodyEvent::Accepted {
        content_type: stream.content_type().to_string(),
    });

    let mut frames = 0;
    match stream.kind().clone() {
        ProcessedBody::Video => {
            let mut file = match output {
                Some(path) => Some(tokio::fs::File::create(path).await?),
                None => None,
            };
            while let Some(chunk) = stream.next_chunk().await? {
                if let Some(file) = file.as_mut() {
                    file.write_all(&chunk).await?;
                }
            }
            if let Some(mut file) = file {
                file.flush().await?;
            }
        }
        ProcessedBody::Mjpeg { boundary } => {
            let mut splitter = MjpegSplitter::new(&boundary);
            let mut latest = None;
            while let Some(chunk) = stream.next_chunk().await? {
                for frame in splitter.push(&chunk) {
                    frames += 1;
                    latest = Some(frame);
                }
            }
            if let Some(frame) = splitter.finish() {
                frames += 1;
                latest = Some(frame);
            }
            if let (Some(path), Some(frame)) = (output, latest) {
                tokio::fs::write(path, frame).await?;
            }
        }
    }
    Ok((stream.bytes_received(), frames))
}

async fn next_notification(
    rx: &mut Option<mpsc::UnboundedReceiver<ClientNotification>>,
) -> Option<ClientNotification> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::cast_precision_loss)]
fn report_summary(
    session: &ProcessingSessionController,
    (bytes, frames): (u64, u64),
    elapsed: Duration,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&Summary {
            session: session
                .active_session()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            status: session.status().to_string(),
            total_count: session.total_count(),
            output: session.output().map(url::Url::as_str),
            recent: session.details().iter().collect(),
            bytes_received: bytes,
            preview_frames: frames,
            elapsed_secs: elapsed.as_secs_f64(),
        });
    }

    match session.status() {
        SessionStatus::Completed => println!("✅ {}", session.status_message()),
        SessionStatus::Failed => println!("❌ {}", session.status_message()),
        status => println!(
            "⏹️  Stopped while {status}. Count so far: {}",
            session.total_count()
        ),
    }
    if let Some(output) = session.output() {
        println!("   Output: {output}");
    }
    if !session.details().is_empty() {
        println!("   Recent crossings: {}", session.details().len());
    }
    println!(
        "   Received {:.1} MB{} in {:.1}s",
        bytes as f64 / 1_048_576.0,
        if frames > 0 {
            format!(" ({frames} preview frames)")
        } else {
            String::new()
        },
        elapsed.as_secs_f64()
    );
    Ok(())
}
