//! hackr.tv live chat over ActionCable (Rails) WebSockets.
//!
//! Connects, waits for `welcome`, subscribes to `LiveChatChannel` for the
//! configured slug and streams packets once the subscription is confirmed.
//! Protocol decisions live in [`protocol::Session`]; this module only moves
//! frames between it and the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::message::Message;

use super::{emit, ChatSource, SourceError};

pub mod protocol;

use protocol::{CableFrame, Session, SessionState, Step};

/// How long the server has to send `welcome` after the socket opens.
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// hackr.tv chat source.
#[derive(Debug, Clone)]
pub struct HackrTvSource {
    ws_url: String,
    token: Option<String>,
    alias: String,
    channel: String,
}

impl HackrTvSource {
    /// Create a source for `channel` at the ActionCable endpoint `ws_url`.
    ///
    /// When `token` is set it is sent, with `alias`, as query parameters.
    pub fn new(
        ws_url: impl Into<String>,
        token: Option<String>,
        alias: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            token: token.filter(|t| !t.is_empty()),
            alias: alias.into(),
            channel: channel.into(),
        }
    }

    /// Final connect URL, with auth query parameters when a token is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL does not parse.
    pub fn connect_url(&self) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.ws_url)?;
        if let Some(token) = &self.token {
            url.query_pairs_mut()
                .append_pair("token", token)
                .append_pair("hackr_alias", &self.alias);
        }
        Ok(url)
    }

    fn handshake_request(&self) -> Result<Request, SourceError> {
        let url = self.connect_url()?;
        let origin = HeaderValue::from_str(&origin_for(&url))
            .map_err(|e| SourceError::Protocol(format!("invalid origin header: {e}")))?;
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(ORIGIN, origin);
        Ok(request)
    }
}

/// `Origin` header value for a WebSocket URL.
///
/// ActionCable's forgery protection compares it against the host, so it is
/// the HTTP equivalent of the socket's scheme, host and port.
pub fn origin_for(url: &Url) -> String {
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}

fn decode_frame(msg: WsMessage) -> Result<Option<CableFrame>, SourceError> {
    match msg {
        WsMessage::Text(text) => match serde_json::from_str::<CableFrame>(text.as_str()) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                debug!(error = %e, "skipping malformed cable frame");
                Ok(None)
            }
        },
        WsMessage::Close(_) => Err(SourceError::Closed),
        _ => Ok(None),
    }
}

async fn next_frame(stream: &mut SplitStream<WsStream>) -> Result<Option<CableFrame>, SourceError> {
    match stream.next().await {
        Some(Ok(msg)) => decode_frame(msg),
        Some(Err(e)) => Err(e.into()),
        None => Err(SourceError::Closed),
    }
}

/// Next ActionCable frame, skipping transport control frames and malformed text.
async fn next_cable_frame(stream: &mut SplitStream<WsStream>) -> Result<CableFrame, SourceError> {
    loop {
        if let Some(frame) = next_frame(stream).await? {
            return Ok(frame);
        }
    }
}

/// Pump frames through the session until a fatal outcome.
async fn read_loop(
    stream: &mut SplitStream<WsStream>,
    session: &mut Session,
    tx: &mpsc::Sender<Message>,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    loop {
        let frame = next_cable_frame(stream).await?;
        match session.on_frame(frame)? {
            Step::Deliver(messages) => {
                for msg in messages {
                    emit(tx, cancel, msg).await?;
                }
            }
            Step::Subscribed => info!(channel = %session.key().chat_channel, "subscribed to hackr.tv chat"),
            Step::Send(_) => {
                warn!("unexpected outbound command after subscribing");
            }
            Step::Ignore => {}
        }
    }
}

#[async_trait]
impl ChatSource for HackrTvSource {
    fn label(&self) -> &'static str {
        "hackr.tv"
    }

    fn target(&self) -> String {
        format!("channel {}", self.channel)
    }

    async fn run(
        &mut self,
        cancel: CancellationToken,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), SourceError> {
        let mut session = Session::new(self.channel.clone());
        let request = self.handshake_request()?;

        let (ws, _response) = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            conn = tokio_tungstenite::connect_async(request) => conn?,
        };
        session.connected();
        let (mut sink, mut stream) = ws.split();

        let first = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            first = tokio::time::timeout(WELCOME_TIMEOUT, next_cable_frame(&mut stream)) => first,
        };
        let welcome = match first {
            Err(_) => {
                return Err(SourceError::Protocol(format!(
                    "no welcome within {}s",
                    WELCOME_TIMEOUT.as_secs()
                )))
            }
            Ok(frame) => frame?,
        };

        let Step::Send(subscribe) = session.on_frame(welcome)? else {
            return Err(SourceError::Protocol("handshake did not yield a subscribe command".to_owned()));
        };
        let command = serde_json::to_string(&subscribe)
            .map_err(|e| SourceError::Protocol(format!("cannot encode subscribe command: {e}")))?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            sent = sink.send(WsMessage::Text(command.into())) => sent?,
        }
        session.subscribe_sent();
        debug!(state = ?session.state(), "subscribe sent");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            res = read_loop(&mut stream, &mut session, &tx, &cancel) => res,
        };
        if matches!(result, Err(SourceError::Cancelled)) {
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(close))).await {
                debug!(error = %e, "close frame not delivered");
            }
        }
        if session.state() != SessionState::Error && session.state() != SessionState::Rejected {
            session.close();
        }
        result
    }
}
