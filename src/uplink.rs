//! Bridge sender: posts Twitch/YouTube chat into hackr.tv via the Uplink API.
//!
//! The HTTP base is derived from the ActionCable URL (`wss://host/cable` →
//! `https://host`). Rate limiting (429) pauses the sender for a fixed
//! cool-down; the limited message itself is skipped.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::message::Message;

/// Uplink endpoint path, relative to the derived base URL.
pub const SEND_PACKET_PATH: &str = "/api/admin/uplink/send_packet";

/// Maximum content length accepted by the API, in bytes.
pub const MAX_CONTENT_BYTES: usize = 512;

/// Pause after a 429 before taking the next message.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(2);

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors from the Uplink client.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    /// The WebSocket URL could not be parsed.
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The WebSocket URL was not `ws://` or `wss://`.
    #[error("unexpected scheme {0:?}, expected ws or wss")]
    UnsupportedScheme(String),

    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered 429.
    #[error("rate limited")]
    RateLimited,

    /// Any other non-201 answer (422 means validation failed).
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed.
        body: String,
    },

    /// The shared cancellation token fired mid-request.
    #[error("cancelled")]
    Cancelled,
}

/// JSON body of a send-packet request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendPacketPayload {
    /// Target chat channel slug.
    pub channel_slug: String,
    /// Formatted, length-capped packet content.
    pub content: String,
}

/// Convert an ActionCable URL into the HTTP base of the same host.
///
/// Path, query and fragment are discarded.
///
/// # Errors
///
/// Fails on unparsable URLs and on schemes other than `ws`/`wss`.
pub fn derive_base_url(ws_url: &str) -> Result<String, UplinkError> {
    let url = Url::parse(ws_url)?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => return Err(UplinkError::UnsupportedScheme(other.to_owned())),
    };
    let host = url.host_str().unwrap_or_default();
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Format a message for hackr.tv: `"[TTV] nightbot: !commands"`.
///
/// Capped at [`MAX_CONTENT_BYTES`]; the cut is not word-aware and backs off
/// to the nearest UTF-8 boundary.
pub fn format_content(msg: &Message) -> String {
    let mut content = format!("{}{}: {}", msg.platform.bridge_tag(), msg.username, msg.content);
    if content.len() > MAX_CONTENT_BYTES {
        let cut = (0..=MAX_CONTENT_BYTES)
            .rev()
            .find(|&i| content.is_char_boundary(i))
            .unwrap_or_default();
        content.truncate(cut);
    }
    content
}

/// Client for the hackr.tv Admin Uplink API.
#[derive(Debug, Clone)]
pub struct UplinkClient {
    base_url: String,
    bearer: String,
    channel: String,
    http: reqwest::Client,
}

impl UplinkClient {
    /// Build a client from the ActionCable URL and the relay credentials.
    ///
    /// # Errors
    ///
    /// Fails if `ws_url` is not a valid `ws://` or `wss://` URL.
    pub fn new(
        ws_url: &str,
        token: &str,
        alias: &str,
        channel: impl Into<String>,
    ) -> Result<Self, UplinkError> {
        let base_url = derive_base_url(ws_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url,
            bearer: format!("{alias}:{token}"),
            channel: channel.into(),
            http,
        })
    }

    /// HTTP base derived at construction.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request body for `msg`.
    pub fn payload(&self, msg: &Message) -> SendPacketPayload {
        SendPacketPayload {
            channel_slug: self.channel.clone(),
            content: format_content(msg),
        }
    }

    /// Post one message.
    ///
    /// # Errors
    ///
    /// [`UplinkError::RateLimited`] on 429, [`UplinkError::UnexpectedStatus`]
    /// on any other non-201, or a transport error.
    pub async fn send(&self, msg: &Message) -> Result<(), UplinkError> {
        let url = format!("{}{SEND_PACKET_PATH}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer)
            .json(&self.payload(msg))
            .send()
            .await?;

        match resp.status().as_u16() {
            201 => Ok(()),
            429 => Err(UplinkError::RateLimited),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(UplinkError::UnexpectedStatus {
                    status,
                    body: body.trim().to_owned(),
                })
            }
        }
    }

    /// Forward messages from `rx` until it closes or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, mut rx: mpsc::Receiver<Message>) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => return,
                next = rx.recv() => match next {
                    Some(msg) => msg,
                    None => return,
                },
            };

            let sent = tokio::select! {
                _ = cancel.cancelled() => Err(UplinkError::Cancelled),
                sent = self.send(&msg) => sent,
            };

            match sent {
                Ok(()) => debug!(platform = %msg.platform, username = %msg.username, "bridged message"),
                Err(UplinkError::Cancelled) => return,
                Err(UplinkError::RateLimited) => {
                    warn!(
                        username = %msg.username,
                        cooldown_secs = RATE_LIMIT_COOLDOWN.as_secs(),
                        "uplink rate limited, skipping message and backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RATE_LIMIT_COOLDOWN) => {}
                    }
                }
                Err(e) => warn!(error = %e, "uplink send failed"),
            }
        }
    }
}
