//! `linecount` CLI - Draw a counting line, submit a video, follow live counts

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use linecount::ClientConfig;

use cmd::{
    cmd_classes, cmd_custom_models, cmd_history, cmd_models, cmd_process, cmd_trackers,
    cmd_upload_model, cmd_watch,
};

#[derive(Parser)]
#[command(name = "linecount")]
#[command(about = "Line-crossing counter client for a video counting server")]
#[command(version)]
struct Cli {
    /// Server base URL, e.g. http://127.0.0.1:8000 (overrides the config file)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Config file [default: ~/.config/linecount/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the server's built-in detection models
    Models,

    /// List the available trackers
    Trackers,

    /// List uploaded custom models
    CustomModels,

    /// List the classes a model can detect
    Classes {
        /// Model name, e.g. yolov8n or helmets.pt
        model: String,
    },

    /// Upload a custom .pt model
    UploadModel {
        /// Path to the .pt file
        file: PathBuf,
    },

    /// Show the last 10 counting runs
    History,

    /// Follow the live counting channel until Ctrl-C
    Watch {
        /// Exit after the first video_ended event
        #[arg(long)]
        until_ended: bool,
    },

    /// Submit a video with a counting line and follow it to completion
    Process(ProcessArgs),
}

/// Output mode shared by all commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Width and height given as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Args)]
pub struct ProcessArgs {
    /// Video file to process
    pub video: PathBuf,

    /// Counting line as X1,Y1,X2,Y2 in display coordinates
    #[arg(long, value_parser = parse_line, allow_hyphen_values = true)]
    pub line: [f64; 4],

    /// Size the line was drawn at, as WxH [default: the video's own size]
    #[arg(long, value_parser = parse_size)]
    pub display: Option<Size>,

    /// Video size as WxH, skips ffprobe
    #[arg(long, value_parser = parse_size)]
    pub intrinsic: Option<Size>,

    /// Built-in model [default: from config, yolov8n]
    #[arg(long, conflicts_with = "custom_model")]
    pub model: Option<String>,

    /// Uploaded .pt model to use instead of a built-in one
    #[arg(long)]
    pub custom_model: Option<String>,

    /// Tracker [default: from config, bytetrack]
    #[arg(long)]
    pub tracker: Option<String>,

    /// Comma-separated class ids or names to count
    #[arg(long, value_delimiter = ',', conflicts_with = "all_classes")]
    pub classes: Vec<String>,

    /// Count every class the model knows
    #[arg(long)]
    pub all_classes: bool,

    /// Detection confidence threshold (0-1)
    #[arg(long)]
    pub conf: Option<f64>,

    /// IoU threshold (0-1)
    #[arg(long)]
    pub iou: Option<f64>,

    /// Frames a lost track is kept alive
    #[arg(long)]
    pub track_buffer: Option<u32>,

    /// Save the processed video (or the latest preview frame for MJPEG responses)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Render the counting line overlay to a PNG before submitting
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// Don't follow the live channel; only wait for the HTTP response
    #[arg(long)]
    pub no_wait: bool,
}

fn parse_line(s: &str) -> std::result::Result<[f64; 4], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("`{v}`: {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match values.as_slice() {
        [x1, y1, x2, y2] if values.iter().all(|v| v.is_finite()) => Ok([*x1, *y1, *x2, *y2]),
        [_, _, _, _] => Err("coordinates must be finite".to_string()),
        _ => Err(format!("expected X1,Y1,X2,Y2, got {} values", values.len())),
    }
}

fn parse_size(s: &str) -> std::result::Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got `{s}`"))?;
    let width: f64 = w.trim().parse().map_err(|e| format!("width `{w}`: {e}"))?;
    let height: f64 = h.trim().parse().map_err(|e| format!("height `{h}`: {e}"))?;
    if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
        return Err(format!("size must be positive, got `{s}`"));
    }
    Ok(Size { width, height })
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
            ClientConfig::load_from(path)?
        }
        None => ClientConfig::load()?,
    };
    if let Some(server) = &cli.server {
        config.server_url.clone_from(server);
    }
    config.server_url().context("invalid server URL")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_env("LINECOUNT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Commands::Models => cmd_models(&config, format).await?,
        Commands::Trackers => cmd_trackers(&config, format).await?,
        Commands::CustomModels => cmd_custom_models(&config, format).await?,
        Commands::Classes { model } => cmd_classes(&config, &model, format).await?,
        Commands::UploadModel { file } => cmd_upload_model(&config, &file, format).await?,
        Commands::History => cmd_history(&config, format).await?,
        Commands::Watch { until_ended } => cmd_watch(&config, until_ended, format).await?,
        Commands::Process(args) => cmd_process(&config, args, format).await?,
    }

    Ok(())
}
