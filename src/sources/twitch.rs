//! Twitch chat over anonymous, read-only IRC.
//!
//! Twitch accepts `justinfan<N>` nicknames without a password for reading
//! public channels, so no credentials are involved.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::message::{Message, Platform};

use super::{emit, ChatSource, SourceError};

/// Twitch IRC endpoint (plaintext).
pub const IRC_SERVER: &str = "irc.chat.twitch.tv:6667";

/// Prefix of the anonymous nickname.
pub const NICK_PREFIX: &str = "justinfan";

/// Upper bound (inclusive) of the random nickname suffix.
const NICK_SUFFIX_MAX: u32 = 99_999;

/// Rolling read deadline; only there so cancellation is noticed promptly.
pub const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Lines longer than this are skipped rather than buffered.
const MAX_LINE_LENGTH: usize = 8192;

/// Classification of one received IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcLine {
    /// Server keepalive; `reply` is the full `PONG` line to send back.
    Ping {
        /// Reply line, without the trailing CRLF.
        reply: String,
    },
    /// A chat message.
    Chat {
        /// Sender nickname.
        username: String,
        /// Message text.
        content: String,
    },
    /// Anything else (numerics, JOIN echoes, malformed lines).
    Other,
}

/// Classify a raw IRC line.
pub fn parse_line(line: &str) -> IrcLine {
    let line = line.trim();
    if let Some(token) = line.strip_prefix("PING") {
        return IrcLine::Ping {
            reply: format!("PONG{token}"),
        };
    }
    match parse_privmsg(line) {
        Some((username, content)) => IrcLine::Chat { username, content },
        None => IrcLine::Other,
    }
}

/// Extract `(sender, text)` from a `PRIVMSG` line.
///
/// Expected shape: `:nick!user@host PRIVMSG #channel :text`.
pub fn parse_privmsg(line: &str) -> Option<(String, String)> {
    let (_, after_command) = line.split_once("PRIVMSG")?;
    let (username, _) = line.strip_prefix(':')?.split_once('!')?;
    let (_, content) = after_command.split_once(" :")?;
    Some((username.to_owned(), content.to_owned()))
}

/// Generate an anonymous read-only nickname.
pub fn anonymous_nick() -> String {
    let suffix = rand::thread_rng().gen_range(1..=NICK_SUFFIX_MAX);
    format!("{NICK_PREFIX}{suffix}")
}

/// Twitch IRC source for a single channel.
#[derive(Debug, Clone)]
pub struct TwitchSource {
    channel: String,
    server: String,
}

impl TwitchSource {
    /// Create a source for `channel` (case-insensitive, without `#`).
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_lowercase(),
            server: IRC_SERVER.to_owned(),
        }
    }

    /// Point the source at a different IRC endpoint (`host:port`).
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// The lower-cased channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<(), SourceError> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl ChatSource for TwitchSource {
    fn label(&self) -> &'static str {
        "Twitch"
    }

    fn target(&self) -> String {
        format!("#{}", self.channel)
    }

    async fn run(
        &mut self,
        cancel: CancellationToken,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), SourceError> {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            conn = TcpStream::connect(&self.server) => conn?,
        };
        let (read_half, mut write_half) = stream.into_split();

        let nick = anonymous_nick();
        let register = format!("NICK {nick}\r\nJOIN #{}", self.channel);
        tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            sent = send_line(&mut write_half, &register) => sent?,
        }
        info!(channel = %self.channel, nick = %nick, "joined Twitch channel");

        let mut lines =
            FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                next = tokio::time::timeout(READ_DEADLINE, lines.next()) => next,
            };

            let line = match next {
                // Deadline passed with nothing to read; go round again.
                Err(_) => continue,
                Ok(None) => return Err(SourceError::Closed),
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    debug!("skipping oversized IRC line");
                    continue;
                }
                Ok(Some(Err(LinesCodecError::Io(e)))) => return Err(e.into()),
                Ok(Some(Ok(line))) => line,
            };

            match parse_line(&line) {
                IrcLine::Ping { reply } => tokio::select! {
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                    sent = send_line(&mut write_half, &reply) => sent?,
                },
                IrcLine::Chat { username, content } => {
                    let msg = Message::new(Platform::Twitch, username, Utc::now(), content);
                    emit(&tx, &cancel, msg).await?;
                }
                IrcLine::Other => {}
            }
        }
    }
}
