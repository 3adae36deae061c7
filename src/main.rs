//! Relay CLI entry point.
//!
//! Watches the configured chats, prints the merged stream to stdout and, with
//! `--bridge`, forwards Twitch and YouTube chat into hackr.tv.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay::config::{load_config, CliOverrides, Config};
use relay::dispatch::{Dispatcher, BRIDGE_BUFFER, DISPLAY_BUFFER, SOURCE_BUFFER};
use relay::display::Printer;
use relay::logging::{self, LoggingGuard};
use relay::sources::hackrtv::HackrTvSource;
use relay::sources::twitch::TwitchSource;
use relay::sources::youtube::YouTubeSource;
use relay::sources::{spawn_source, ChatSource};
use relay::uplink::UplinkClient;

/// Relay: Twitch, YouTube and hackr.tv live chat in one terminal.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Twitch channel name.
    #[arg(long)]
    twitch_channel: Option<String>,

    /// YouTube live stream video id.
    #[arg(long)]
    youtube_video_id: Option<String>,

    /// YouTube Data API key (falls back to YOUTUBE_API_KEY).
    #[arg(long)]
    youtube_api_key: Option<String>,

    /// hackr.tv ActionCable URL, e.g. wss://hackr.tv/cable.
    #[arg(long)]
    hackrtv_url: Option<String>,

    /// hackr.tv chat channel slug [default: live].
    #[arg(long)]
    hackrtv_channel: Option<String>,

    /// hackr.tv API token (falls back to HACKRTV_API_TOKEN).
    #[arg(long)]
    hackrtv_token: Option<String>,

    /// Hackr alias that owns the token [default: relay].
    #[arg(long)]
    hackrtv_alias: Option<String>,

    /// Forward Twitch and YouTube chat into hackr.tv.
    #[arg(long)]
    bridge: bool,

    /// Disable coloured output.
    #[arg(long)]
    no_color: bool,

    /// Also write JSON logs to this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            twitch_channel: self.twitch_channel.clone(),
            youtube_video_id: self.youtube_video_id.clone(),
            youtube_api_key: self.youtube_api_key.clone(),
            hackrtv_url: self.hackrtv_url.clone(),
            hackrtv_channel: self.hackrtv_channel.clone(),
            hackrtv_token: self.hackrtv_token.clone(),
            hackrtv_alias: self.hackrtv_alias.clone(),
            bridge: self.bridge.then_some(true),
            log_dir: self.log_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }

    let config = resolve_config(&cli)?;
    let _logging_guard = init_logging(&config)?;
    config.validate()?;

    run(config, !cli.no_color && std::io::stdout().is_terminal()).await
}

/// Layer file, flags and environment into a single config.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_overrides(&cli.overrides());
    config.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    Ok(config)
}

fn init_logging(config: &Config) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.logging.dir {
        Some(dir) => logging::init_with_file(dir, &config.logging.level).map(Some),
        None => {
            logging::init_cli(&config.logging.level);
            Ok(None)
        }
    }
}

/// Build the enabled sources in a fixed order.
fn build_sources(config: &Config) -> Vec<Box<dyn ChatSource>> {
    let mut sources: Vec<Box<dyn ChatSource>> = Vec::new();
    if !config.twitch.channel.is_empty() {
        sources.push(Box::new(TwitchSource::new(&config.twitch.channel)));
    }
    if !config.youtube.video_id.is_empty() {
        sources.push(Box::new(YouTubeSource::new(
            config.youtube.api_key.clone(),
            config.youtube.video_id.clone(),
        )));
    }
    if !config.hackrtv.url.is_empty() {
        sources.push(Box::new(HackrTvSource::new(
            config.hackrtv.url.clone(),
            config.hackrtv_token(),
            config.hackrtv.alias.clone(),
            config.hackrtv.channel.clone(),
        )));
    }
    sources
}

/// Cancel `cancel` on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutting down");
        cancel.cancel();
    });
}

async fn run(config: Config, color: bool) -> anyhow::Result<()> {
    let uplink = if config.bridge {
        let client = UplinkClient::new(
            &config.hackrtv.url,
            &config.hackrtv.token,
            &config.hackrtv.alias,
            config.hackrtv.channel.clone(),
        )
        .context("failed to set up bridge")?;
        info!(base_url = client.base_url(), channel = %config.hackrtv.channel, "bridge enabled");
        Some(client)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let (source_tx, source_rx) = mpsc::channel(SOURCE_BUFFER);
    let (display_tx, display_rx) = mpsc::channel(DISPLAY_BUFFER);

    let printer = tokio::spawn(Printer::stdout(color).run(display_rx));

    let (bridge_tx, bridge_task) = match uplink {
        Some(client) => {
            let (tx, rx) = mpsc::channel(BRIDGE_BUFFER);
            let token = cancel.clone();
            let task = tokio::spawn(async move { client.run(token, rx).await });
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    let dispatcher = Dispatcher::new(config.hackrtv.alias.clone(), display_tx, bridge_tx);
    let dispatch_task = tokio::spawn(dispatcher.run(source_rx));

    let handles: Vec<_> = build_sources(&config)
        .into_iter()
        .map(|source| spawn_source(source, cancel.clone(), source_tx.clone()))
        .collect();
    drop(source_tx);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "source task panicked");
        }
    }

    let stats = dispatch_task.await.context("dispatcher task failed")?;
    debug!(?stats, "dispatch complete");
    if let Err(e) = printer.await {
        warn!(error = %e, "display task failed");
    }
    if let Some(task) = bridge_task {
        if let Err(e) = task.await {
            warn!(error = %e, "bridge task failed");
        }
    }
    Ok(())
}
