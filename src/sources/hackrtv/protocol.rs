//! ActionCable framing and the subscription state machine for hackr.tv chat.
//!
//! The session is transport-free: it consumes decoded [`CableFrame`]s and
//! tells the caller what to do next, so the handshake can be exercised
//! without a socket.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::message::{timestamp_or_now, Message, Platform};

use super::super::SourceError;

/// ActionCable channel class serving live chat.
pub const CHANNEL_CLASS: &str = "LiveChatChannel";

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One ActionCable frame, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CableFrame {
    /// Protocol frame type (`welcome`, `ping`, `confirm_subscription`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Channel payload or disconnect reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// JSON-encoded [`SubscriptionKey`] the frame belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Client command (`subscribe`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Why the server is disconnecting us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CableFrame {
    /// Build a `subscribe` command for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be serialised.
    pub fn subscribe(key: &SubscriptionKey) -> Result<Self, serde_json::Error> {
        Ok(Self {
            command: Some("subscribe".to_owned()),
            identifier: Some(key.to_identifier()?),
            ..Self::default()
        })
    }

    fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }
}

/// Structured channel identifier.
///
/// Matched by decoded fields, never by raw string: servers are free to
/// reorder keys or add whitespace when echoing it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Channel class, always [`CHANNEL_CLASS`] for chat.
    pub channel: String,
    /// Chat channel slug.
    pub chat_channel: String,
}

impl SubscriptionKey {
    /// Key for the live chat channel `slug`.
    pub fn live_chat(slug: impl Into<String>) -> Self {
        Self {
            channel: CHANNEL_CLASS.to_owned(),
            chat_channel: slug.into(),
        }
    }

    /// JSON encoding used as the frame `identifier`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_identifier(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether a raw identifier decodes to this key. Extra fields are allowed.
    pub fn matches(&self, raw_identifier: &str) -> bool {
        serde_json::from_str::<SubscriptionKey>(raw_identifier).is_ok_and(|key| key == *self)
    }
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// Treat JSON `null` like a missing key. Rails renders nil columns as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Author of a chat packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketAuthor {
    /// Account id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    /// Display alias.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hackr_alias: String,
    /// Role (`admin`, `operative`, ...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
}

/// A chat packet as broadcast by hackr.tv.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    /// Message text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// RFC 3339 creation time.
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    /// Moderated or retracted; must never be shown.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dropped: bool,
    /// Author details.
    #[serde(default, deserialize_with = "null_as_default")]
    pub grid_hackr: PacketAuthor,
}

impl Packet {
    /// Convert to a [`Message`], or `None` for a dropped packet.
    pub fn into_message(self) -> Option<Message> {
        if self.dropped {
            return None;
        }
        Some(Message::new(
            Platform::HackrTv,
            self.grid_hackr.hackr_alias,
            timestamp_or_now(&self.created_at),
            self.content,
        ))
    }
}

/// Channel payload carried in a data frame's `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelPayload {
    /// Backlog sent right after subscribing.
    InitialPackets {
        /// Historical packets, oldest first.
        #[serde(default)]
        packets: Vec<Packet>,
    },
    /// A packet posted live.
    NewPacket {
        /// The new packet.
        packet: Packet,
    },
}

impl ChannelPayload {
    /// Visible messages in this payload, in order, dropped packets removed.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::InitialPackets { packets } => {
                packets.into_iter().filter_map(Packet::into_message).collect()
            }
            Self::NewPacket { packet } => packet.into_message().into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// Where the subscription handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket not yet open.
    Connecting,
    /// Socket open, waiting for `welcome`.
    AwaitingWelcome,
    /// `welcome` seen, subscribe command not yet written.
    Subscribing,
    /// Subscribe sent, waiting for confirmation.
    AwaitingConfirmation,
    /// Subscribed; data frames are decoded.
    Streaming,
    /// Closed by us.
    Closed,
    /// The server rejected the subscription.
    Rejected,
    /// Protocol violation or server disconnect.
    Error,
}

impl SessionState {
    /// Whether no further frames will be accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected | Self::Error)
    }
}

/// What the transport should do after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing to do.
    Ignore,
    /// Write this frame to the peer (the subscribe command).
    Send(CableFrame),
    /// Subscription confirmed.
    Subscribed,
    /// Forward these messages downstream, in order.
    Deliver(Vec<Message>),
}

/// Subscription session for one chat channel.
#[derive(Debug, Clone)]
pub struct Session {
    key: SubscriptionKey,
    state: SessionState,
}

impl Session {
    /// New session for chat channel `slug`, in [`SessionState::Connecting`].
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            key: SubscriptionKey::live_chat(slug),
            state: SessionState::Connecting,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The key this session subscribes with.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// The socket is open.
    pub fn connected(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::AwaitingWelcome;
        }
    }

    /// The subscribe command returned by [`Step::Send`] has been written.
    pub fn subscribe_sent(&mut self) {
        if self.state == SessionState::Subscribing {
            self.state = SessionState::AwaitingConfirmation;
        }
    }

    /// We are closing the socket.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Feed one inbound frame through the state machine.
    ///
    /// # Errors
    ///
    /// Fatal protocol outcomes: unexpected first frame, rejected
    /// subscription, server disconnect, or a frame after a terminal state.
    pub fn on_frame(&mut self, frame: CableFrame) -> Result<Step, SourceError> {
        let result = match self.state {
            SessionState::Connecting | SessionState::Subscribing => Err(SourceError::Protocol(
                format!("unexpected frame in state {:?}", self.state),
            )),
            SessionState::AwaitingWelcome => self.on_welcome(&frame),
            SessionState::AwaitingConfirmation => self.on_confirmation(&frame),
            SessionState::Streaming => self.on_streaming(frame),
            SessionState::Closed | SessionState::Rejected | SessionState::Error => Err(
                SourceError::Protocol(format!("frame received after session {:?}", self.state)),
            ),
        };
        if let Err(e) = &result {
            if matches!(e, SourceError::Rejected(_)) {
                self.state = SessionState::Rejected;
            } else if !self.state.is_terminal() {
                self.state = SessionState::Error;
            }
        }
        result
    }

    fn on_welcome(&mut self, frame: &CableFrame) -> Result<Step, SourceError> {
        if frame.kind() != "welcome" {
            return Err(SourceError::Protocol(format!(
                "expected welcome, got {:?}",
                frame.kind()
            )));
        }
        let subscribe = CableFrame::subscribe(&self.key)
            .map_err(|e| SourceError::Protocol(format!("cannot encode subscription: {e}")))?;
        self.state = SessionState::Subscribing;
        Ok(Step::Send(subscribe))
    }

    fn on_confirmation(&mut self, frame: &CableFrame) -> Result<Step, SourceError> {
        match frame.kind() {
            "confirm_subscription" if self.is_ours(frame) => {
                self.state = SessionState::Streaming;
                Ok(Step::Subscribed)
            }
            "reject_subscription" => Err(self.rejected()),
            "disconnect" => Err(disconnected(frame)),
            other => {
                debug!(kind = other, "ignoring frame while awaiting confirmation");
                Ok(Step::Ignore)
            }
        }
    }

    fn on_streaming(&mut self, frame: CableFrame) -> Result<Step, SourceError> {
        match frame.kind() {
            "ping" | "confirm_subscription" | "welcome" => return Ok(Step::Ignore),
            "reject_subscription" => return Err(self.rejected()),
            "disconnect" => return Err(disconnected(&frame)),
            _ => {}
        }
        // Shared sockets carry other subscriptions' traffic too.
        if !self.is_ours(&frame) {
            return Ok(Step::Ignore);
        }
        let Some(payload) = frame.message else {
            return Ok(Step::Ignore);
        };
        match serde_json::from_value::<ChannelPayload>(payload) {
            Ok(payload) => Ok(Step::Deliver(payload.into_messages())),
            Err(e) => {
                debug!(error = %e, "skipping undecodable channel payload");
                Ok(Step::Ignore)
            }
        }
    }

    fn is_ours(&self, frame: &CableFrame) -> bool {
        frame
            .identifier
            .as_deref()
            .is_some_and(|raw| self.key.matches(raw))
    }

    fn rejected(&self) -> SourceError {
        SourceError::Rejected(self.key.chat_channel.clone())
    }
}

fn disconnected(frame: &CableFrame) -> SourceError {
    if let Some(reason) = &frame.reason {
        return SourceError::Disconnected(reason.clone());
    }
    let reason = match &frame.message {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    SourceError::Disconnected(reason)
}
