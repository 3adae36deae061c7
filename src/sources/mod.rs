//! Chat source adapters.
//!
//! Each adapter speaks one platform's protocol and pushes normalised
//! [`Message`]s into a shared channel until it fails or is cancelled:
//! - [`twitch::TwitchSource`]: anonymous IRC client
//! - [`youtube::YouTubeSource`]: paginated live chat poller
//! - [`hackrtv::HackrTvSource`]: ActionCable subscribe/confirm client

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::message::Message;

pub mod hackrtv;
pub mod twitch;
pub mod youtube;

/// Errors returned by source adapters.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The shared cancellation token fired. Not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Socket-level I/O failure (connect, read or write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed in transport.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An API answered with an unexpected status code.
    #[error("API returned status {0}")]
    Status(u16),

    /// WebSocket transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A configured URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The peer violated the expected protocol sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server refused our channel subscription.
    #[error("subscription rejected for channel {0:?}")]
    Rejected(String),

    /// The server told us to go away.
    #[error("server disconnected: {0}")]
    Disconnected(String),

    /// The requested stream or chat does not exist or is not live.
    #[error("{0}")]
    NotLive(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Nobody is reading the message channel anymore.
    #[error("message channel closed")]
    ChannelClosed,
}

impl SourceError {
    /// Whether this error is just the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A live chat source.
///
/// Implementations own their connection and any per-instance state
/// (cursors, poll intervals) and run until failure or cancellation.
#[async_trait]
pub trait ChatSource: Send {
    /// Short label used in diagnostics (e.g. `"Twitch"`).
    fn label(&self) -> &'static str;

    /// Human-readable description of what is being watched.
    fn target(&self) -> String;

    /// Stream messages into `tx` until an error occurs or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cancelled`] on cancellation and a descriptive
    /// error for any fatal connection or protocol failure.
    async fn run(
        &mut self,
        cancel: CancellationToken,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), SourceError>;
}

/// Spawn a source on the runtime, logging its terminal error with its label.
///
/// Cancellation ends the task quietly.
pub fn spawn_source(
    mut source: Box<dyn ChatSource>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let label = source.label();
        info!(source = label, target = %source.target(), "connecting");
        match source.run(cancel, tx).await {
            Ok(()) => info!(source = label, "source finished"),
            Err(e) if e.is_cancelled() => info!(source = label, "source stopped"),
            Err(e) => error!(source = label, error = %e, "source failed"),
        }
    })
}

/// Send a message downstream, giving up if cancellation fires first.
///
/// A full channel blocks here; that is the ingestion backpressure point.
pub(crate) async fn emit(
    tx: &mpsc::Sender<Message>,
    cancel: &CancellationToken,
    msg: Message,
) -> Result<(), SourceError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        sent = tx.send(msg) => sent.map_err(|_| SourceError::ChannelClosed),
    }
}

/// Sleep for `period`, returning early with [`SourceError::Cancelled`].
pub(crate) async fn sleep_or_cancel(
    period: std::time::Duration,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        _ = tokio::time::sleep(period) => Ok(()),
    }
}
