//! Twitch IRC source against an in-process IRC server.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay::message::Platform;
use relay::sources::twitch::{TwitchSource, READ_DEADLINE};
use relay::sources::{ChatSource, SourceError};

async fn bind() -> (TcpListener, String) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };
    (listener, addr.to_string())
}

#[tokio::test]
async fn registers_answers_ping_and_emits_chat() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        let nick = lines.next_line().await.expect("read").expect("nick line");
        let join = lines.next_line().await.expect("read").expect("join line");

        write
            .write_all(b":tmi.twitch.tv 001 justinfan :Welcome, GLHF!\r\n")
            .await
            .expect("write welcome");
        write
            .write_all(b"PING :tmi.twitch.tv\r\n")
            .await
            .expect("write ping");
        let pong = lines.next_line().await.expect("read").expect("pong line");

        write
            .write_all(
                b":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #somechannel :hello: there\r\n",
            )
            .await
            .expect("write privmsg");

        // Hold the connection until the client goes away.
        let _ = lines.next_line().await;
        (nick, join, pong)
    });

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    let mut source = TwitchSource::new("SomeChannel").with_server(addr);
    let token = cancel.clone();
    let task = tokio::spawn(async move { source.run(token, tx).await });

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message before timeout")
        .expect("channel open");
    assert_eq!(msg.platform, Platform::Twitch);
    assert_eq!(msg.username, "viewer");
    assert_eq!(msg.content, "hello: there");

    cancel.cancel();
    let result = task.await.expect("source task");
    assert!(matches!(result, Err(SourceError::Cancelled)));

    let (nick, join, pong) = server.await.expect("server task");
    assert!(nick.starts_with("NICK justinfan"), "nick was {nick:?}");
    assert_eq!(join, "JOIN #somechannel");
    assert_eq!(pong, "PONG :tmi.twitch.tv");
}

#[tokio::test]
async fn server_hangup_is_reported_as_closed() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut lines = BufReader::new(socket).lines();
        let _ = lines.next_line().await;
        let _ = lines.next_line().await;
    });

    let (tx, _rx) = mpsc::channel(8);
    let mut source = TwitchSource::new("somechannel").with_server(addr);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        source.run(CancellationToken::new(), tx),
    )
    .await
    .expect("source should stop after hangup");
    assert!(matches!(result, Err(SourceError::Closed)), "got {result:?}");
}

#[tokio::test]
async fn refused_connection_is_an_io_error() {
    let (listener, addr) = bind().await;
    drop(listener);

    let (tx, _rx) = mpsc::channel(8);
    let mut source = TwitchSource::new("somechannel").with_server(addr);
    let result = source.run(CancellationToken::new(), tx).await;
    assert!(matches!(result, Err(SourceError::Io(_))), "got {result:?}");
}

#[tokio::test]
async fn quiet_channel_outlives_read_deadline() {
    let (listener, addr) = bind().await;

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let _ = lines.next_line().await;
        let _ = lines.next_line().await;

        tokio::time::sleep(READ_DEADLINE.saturating_mul(2)).await;
        write
            .write_all(b":late!late@late.tmi.twitch.tv PRIVMSG #somechannel :still here\r\n")
            .await
            .expect("write privmsg");
        let _ = lines.next_line().await;
    });

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    let mut source = TwitchSource::new("somechannel").with_server(addr);
    let token = cancel.clone();
    let task = tokio::spawn(async move { source.run(token, tx).await });

    let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("message before timeout")
        .expect("channel open");
    assert_eq!(msg.username, "late");
    assert_eq!(msg.content, "still here");

    cancel.cancel();
    assert!(matches!(
        task.await.expect("source task"),
        Err(SourceError::Cancelled)
    ));
}
