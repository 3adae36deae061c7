//! The normalised chat message every source produces and every sink consumes.

use std::fmt;

use chrono::{DateTime, Utc};

/// Chat platform a message originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Twitch chat, read over anonymous IRC.
    Twitch,
    /// YouTube live chat, read by polling the Data API.
    YouTube,
    /// hackr.tv chat, read over an ActionCable WebSocket.
    HackrTv,
}

/// Platforms whose messages are forwarded to hackr.tv in bridge mode.
pub const BRIDGED_PLATFORMS: [Platform; 2] = [Platform::Twitch, Platform::YouTube];

impl Platform {
    /// Three-character display code, also used inside bridge tags.
    pub fn code(self) -> &'static str {
        match self {
            Self::Twitch => "TTV",
            Self::YouTube => "YT_",
            Self::HackrTv => "HTV",
        }
    }

    /// Prefix placed in front of bridged content, e.g. `"[TTV] "`.
    pub fn bridge_tag(self) -> String {
        format!("[{}] ", self.code())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single chat message, normalised across platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Where the message came from.
    pub platform: Platform,
    /// Author display name as reported by the platform.
    pub username: String,
    /// When the message was sent (or received, if the platform gave no usable time).
    pub timestamp: DateTime<Utc>,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Build a message from its parts.
    pub fn new(
        platform: Platform,
        username: impl Into<String>,
        timestamp: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            username: username.into(),
            timestamp,
            content: content.into(),
        }
    }
}

/// Parse an RFC 3339 timestamp, falling back to the current time.
///
/// Platforms occasionally send empty or malformed timestamps; those messages
/// are still shown, stamped with the time they were decoded.
pub fn timestamp_or_now(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
