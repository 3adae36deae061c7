//! YouTube live chat via the Data API v3.
//!
//! The video id is resolved once to its `activeLiveChatId`; the chat is then
//! polled page by page, honouring the server's `pollingIntervalMillis`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{timestamp_or_now, Message, Platform};

use super::{emit, sleep_or_cancel, ChatSource, SourceError};

/// Production API base.
pub const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Poll period used until the server suggests one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    live_streaming_details: LiveStreamingDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    active_live_chat_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatResponse {
    #[serde(default)]
    next_page_token: String,
    #[serde(default)]
    polling_interval_millis: u64,
    #[serde(default)]
    items: Vec<LiveChatItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveChatItem {
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    author_details: AuthorDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    display_message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDetails {
    #[serde(default)]
    display_name: String,
}

impl From<LiveChatItem> for Message {
    fn from(item: LiveChatItem) -> Self {
        Message::new(
            Platform::YouTube,
            item.author_details.display_name,
            timestamp_or_now(&item.snippet.published_at),
            item.snippet.display_message,
        )
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Poller for one video's live chat.
///
/// Cursor and poll interval live on the instance, so independent pollers
/// never share pagination state.
pub struct YouTubeSource {
    api_key: String,
    video_id: String,
    api_base: String,
    client: reqwest::Client,
    live_chat_id: Option<String>,
    page_token: Option<String>,
    poll_interval: Duration,
}

impl YouTubeSource {
    /// Create a poller for `video_id` authenticated with `api_key`.
    pub fn new(api_key: impl Into<String>, video_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            api_key: api_key.into(),
            video_id: video_id.into(),
            api_base: API_BASE.to_owned(),
            client,
            live_chat_id: None,
            page_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use a different API base URL (no trailing slash).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Current poll period.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Cursor that will be sent with the next fetch, if any.
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    /// Live chat id resolved by [`Self::resolve_live_chat_id`].
    pub fn live_chat_id(&self) -> Option<&str> {
        self.live_chat_id.as_deref()
    }

    /// Look up the video's active live chat id and remember it.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-200 responses, an unknown video, or a
    /// video without an active chat.
    pub async fn resolve_live_chat_id(&mut self) -> Result<String, SourceError> {
        let url = format!("{}/videos", self.api_base);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", self.video_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SourceError::Status(resp.status().as_u16()));
        }
        let body: VideoListResponse = resp.json().await?;

        let item = body
            .items
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotLive(format!("video not found: {}", self.video_id)))?;
        let chat_id = item.live_streaming_details.active_live_chat_id;
        if chat_id.is_empty() {
            return Err(SourceError::NotLive(format!(
                "video {} does not have an active live chat",
                self.video_id
            )));
        }

        self.live_chat_id = Some(chat_id.clone());
        Ok(chat_id)
    }

    /// Fetch the next page of chat messages.
    ///
    /// Advances the cursor and adopts the server's poll interval when one is
    /// given.
    ///
    /// # Errors
    ///
    /// Fails if the chat id is unresolved, on transport errors, non-200
    /// responses or undecodable bodies. Cursor and interval are left
    /// untouched on failure.
    pub async fn fetch_messages(&mut self) -> Result<Vec<Message>, SourceError> {
        let chat_id = self
            .live_chat_id
            .as_deref()
            .ok_or_else(|| SourceError::Protocol("live chat id not resolved".to_owned()))?;

        let url = format!("{}/liveChat/messages", self.api_base);
        let mut query = vec![
            ("part", "snippet,authorDetails"),
            ("liveChatId", chat_id),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = self.page_token.as_deref() {
            query.push(("pageToken", token));
        }

        let resp = self.client.get(&url).query(&query).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SourceError::Status(resp.status().as_u16()));
        }
        let page: LiveChatResponse = resp.json().await?;

        self.page_token = if page.next_page_token.is_empty() {
            None
        } else {
            Some(page.next_page_token)
        };
        if page.polling_interval_millis > 0 {
            self.poll_interval = Duration::from_millis(page.polling_interval_millis);
        }
        debug!(
            count = page.items.len(),
            interval_ms = self.poll_interval.as_millis(),
            "fetched YouTube chat page"
        );

        Ok(page.items.into_iter().map(Message::from).collect())
    }
}

#[async_trait]
impl ChatSource for YouTubeSource {
    fn label(&self) -> &'static str {
        "YouTube"
    }

    fn target(&self) -> String {
        format!("video {}", self.video_id)
    }

    async fn run(
        &mut self,
        cancel: CancellationToken,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), SourceError> {
        let chat_id = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            resolved = self.resolve_live_chat_id() => resolved?,
        };
        info!(video = %self.video_id, chat = %chat_id, "resolved YouTube live chat");

        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                fetched = self.fetch_messages() => fetched,
            };
            match fetched {
                Ok(messages) => {
                    for msg in messages {
                        emit(&tx, &cancel, msg).await?;
                    }
                }
                Err(e) => warn!(error = %e, "YouTube fetch failed, retrying next tick"),
            }
            sleep_or_cancel(self.poll_interval, &cancel).await?;
        }
    }
}
