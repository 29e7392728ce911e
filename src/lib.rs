//! `linecount` - Line-crossing counter client
//!
//! # Features
//!
//! - **Overlay**: draw a counting line in display space, keep it in video
//!   pixels, rasterize it for previews
//! - **Live events**: WebSocket client with a single owned reconnect timer
//! - **Session**: state machine from video selection to completed output
//! - **Server API**: catalogs, model upload, processing, count history
//!
//! # Example
//!
//! ```rust,no_run
//! use linecount::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::load()?;
//!     let api = ApiClient::from_config(&config)?;
//!     for model in api.models().await? {
//!         println!("{model}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;
pub mod live;
pub mod mjpeg;
pub mod overlay;
pub mod probe;
pub mod session;

pub use config::ClientConfig;
pub use error::{CountError, Result};
pub use http_client::{ApiClient, CountRecord, ProcessedBody, ProcessedStream};
pub use live::{ClientNotification, LiveEvent, LiveEventClient, ReconnectPolicy};
pub use mjpeg::MjpegSplitter;
pub use overlay::{
    CanvasRenderer, CoordinateMapper, CountingLine, DisplayRect, LineAnnotator, PixmapSurface,
    Point, VideoFrameGeometry,
};
pub use probe::{VideoDimensions, VideoProbe};
pub use session::{
    ModelClass, ModelSource, ProcessingSessionController, SessionStatus, Submission,
    TrackerParams,
};

/// Version of linecount
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
