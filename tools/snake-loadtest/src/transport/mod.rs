//! The message channel a virtual player talks through.
//!
//! Players only see [`Connector`] and [`Channel`]; [`ws::WsConnector`] is the
//! real WebSocket implementation.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub mod ws;

/// HTTP status of a successful WebSocket upgrade.
pub const SWITCHING_PROTOCOLS: u16 = 101;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("upgrade rejected with status {0}")]
    Rejected(u16),
    #[error("timed out opening connection after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

/// A freshly opened channel and the status the upgrade answered with.
#[derive(Debug)]
pub struct Opened<C> {
    pub status: u16,
    pub channel: C,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    async fn open(&self, url: &Url) -> Result<Opened<Self::Channel>, TransportError>;
}

/// Bidirectional text channel. Frames on one channel are delivered in order.
#[async_trait]
pub trait Channel: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text frame, `None` once the peer closed the channel.
    ///
    /// CANCEL-SAFETY: must be cancel-safe, players race it against their timers.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}
