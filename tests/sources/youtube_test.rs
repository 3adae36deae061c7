//! YouTube poller against a scripted Data API.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay::message::Platform;
use relay::sources::youtube::{YouTubeSource, DEFAULT_POLL_INTERVAL};
use relay::sources::{ChatSource, SourceError};

use crate::http_fake::serve;

const VIDEO_LIVE: &str = r#"{"items":[{"liveStreamingDetails":{"activeLiveChatId":"chat-1"}}]}"#;

fn page(next: &str, interval_ms: u64, items: &str) -> String {
    format!(r#"{{"nextPageToken":"{next}","pollingIntervalMillis":{interval_ms},"items":[{items}]}}"#)
}

fn item(author: &str, text: &str, published: &str) -> String {
    format!(
        r#"{{"snippet":{{"publishedAt":"{published}","displayMessage":"{text}"}},"authorDetails":{{"displayName":"{author}"}}}}"#
    )
}

#[tokio::test]
async fn resolves_then_pages_with_cursor() {
    let mut server = serve(vec![
        (200, VIDEO_LIVE.to_owned()),
        (
            200,
            page("p2", 1500, &item("viewer", "hi", "2024-03-01T12:00:00Z")),
        ),
        (200, page("", 0, "")),
    ])
    .await;

    let mut source = YouTubeSource::new("k3y", "vid123").with_api_base(server.base_url.clone());

    let chat_id = source.resolve_live_chat_id().await.expect("resolve");
    assert_eq!(chat_id, "chat-1");
    assert_eq!(source.live_chat_id(), Some("chat-1"));

    let first = source.fetch_messages().await.expect("first page");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].platform, Platform::YouTube);
    assert_eq!(first[0].username, "viewer");
    assert_eq!(first[0].content, "hi");
    assert_eq!(
        first[0].timestamp,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    );
    assert_eq!(source.page_token(), Some("p2"));
    assert_eq!(source.poll_interval(), Duration::from_millis(1500));

    let second = source.fetch_messages().await.expect("second page");
    assert!(second.is_empty());
    assert_eq!(source.page_token(), None);
    // Zero interval keeps the previous one.
    assert_eq!(source.poll_interval(), Duration::from_millis(1500));

    let videos = server.requests.recv().await.expect("videos request");
    assert!(videos.request_line.starts_with("GET /videos?"), "{}", videos.request_line);
    assert!(videos.request_line.contains("part=liveStreamingDetails"));
    assert!(videos.request_line.contains("id=vid123"));
    assert!(videos.request_line.contains("key=k3y"));
    // The key travels in the query, never as a header.
    assert_eq!(videos.header("authorization"), None);

    let first_fetch = server.requests.recv().await.expect("first fetch");
    assert!(first_fetch.request_line.starts_with("GET /liveChat/messages?"));
    assert!(first_fetch.request_line.contains("liveChatId=chat-1"));
    assert!(!first_fetch.request_line.contains("pageToken"));

    let second_fetch = server.requests.recv().await.expect("second fetch");
    assert!(second_fetch.request_line.contains("pageToken=p2"));
}

#[tokio::test]
async fn unknown_video_is_not_live() {
    let server = serve(vec![(200, r#"{"items":[]}"#.to_owned())]).await;
    let mut source = YouTubeSource::new("k", "missing").with_api_base(server.base_url.clone());

    match source.resolve_live_chat_id().await {
        Err(SourceError::NotLive(reason)) => assert!(reason.contains("video not found")),
        other => panic!("expected not-live error, got {other:?}"),
    }
}

#[tokio::test]
async fn video_without_chat_is_not_live() {
    let server = serve(vec![(
        200,
        r#"{"items":[{"liveStreamingDetails":{}}]}"#.to_owned(),
    )])
    .await;
    let mut source = YouTubeSource::new("k", "vod").with_api_base(server.base_url.clone());

    match source.resolve_live_chat_id().await {
        Err(SourceError::NotLive(reason)) => {
            assert!(reason.contains("does not have an active live chat"));
        }
        other => panic!("expected not-live error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_200_resolve_is_a_status_error() {
    let server = serve(vec![(403, r#"{"error":{"code":403}}"#.to_owned())]).await;
    let mut source = YouTubeSource::new("bad", "vid").with_api_base(server.base_url.clone());

    assert!(matches!(
        source.resolve_live_chat_id().await,
        Err(SourceError::Status(403))
    ));
}

#[tokio::test]
async fn failed_fetch_keeps_cursor_and_interval() {
    let server = serve(vec![
        (200, VIDEO_LIVE.to_owned()),
        (200, page("p2", 2500, "")),
        (500, "{}".to_owned()),
    ])
    .await;
    let mut source = YouTubeSource::new("k", "vid").with_api_base(server.base_url.clone());
    assert_eq!(source.poll_interval(), DEFAULT_POLL_INTERVAL);

    source.resolve_live_chat_id().await.expect("resolve");
    source.fetch_messages().await.expect("first page");
    assert!(matches!(
        source.fetch_messages().await,
        Err(SourceError::Status(500))
    ));
    assert_eq!(source.page_token(), Some("p2"));
    assert_eq!(source.poll_interval(), Duration::from_millis(2500));
}

#[tokio::test]
async fn fetch_before_resolve_fails() {
    let mut source = YouTubeSource::new("k", "vid").with_api_base("http://127.0.0.1:9");
    assert!(matches!(
        source.fetch_messages().await,
        Err(SourceError::Protocol(_))
    ));
}

#[tokio::test]
async fn run_emits_in_order_and_survives_fetch_errors() {
    let items = format!(
        "{},{}",
        item("first", "one", "2024-03-01T12:00:00Z"),
        item("second", "two", "not a timestamp")
    );
    let server = serve(vec![
        (200, VIDEO_LIVE.to_owned()),
        (200, page("p2", 20, &items)),
        // Later polls hit a closed listener and are logged, not fatal.
    ])
    .await;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    let mut source = YouTubeSource::new("k", "vid").with_api_base(server.base_url.clone());
    let token = cancel.clone();
    let task = tokio::spawn(async move { source.run(token, tx).await });

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first before timeout")
        .expect("channel open");
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("second before timeout")
        .expect("channel open");
    assert_eq!(first.username, "first");
    assert_eq!(second.username, "second");
    // Unparsable timestamps fall back to roughly now.
    assert!(Utc::now().signed_duration_since(second.timestamp) < chrono::Duration::seconds(60));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished(), "fetch errors must not stop the poller");

    cancel.cancel();
    let result = task.await.expect("source task");
    assert!(matches!(result, Err(SourceError::Cancelled)));
}

#[tokio::test]
async fn run_stops_when_video_is_not_live() {
    let server = serve(vec![(200, r#"{"items":[]}"#.to_owned())]).await;
    let (tx, _rx) = mpsc::channel(8);
    let mut source = YouTubeSource::new("k", "gone").with_api_base(server.base_url.clone());

    let result = source.run(CancellationToken::new(), tx).await;
    assert!(matches!(result, Err(SourceError::NotLive(_))));
}
