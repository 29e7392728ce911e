//! Real-time counting events.
//!
//! - [`event`] decodes payloads into [`LiveEvent`]s
//! - [`transport`] is the WebSocket seam
//! - [`client`] keeps one connection alive and fans events out

pub mod client;
pub mod event;
pub mod transport;

pub use client::{
    ClientNotification, ConnectionMachine, ConnectionState, LiveEventClient, ReconnectPolicy,
    DEFAULT_RECONNECT_BACKOFF,
};
pub use event::{LiveEvent, Progress};
pub use transport::{Connector, EventSource, WebSocket, WebSocketMessage, WsConnector};
