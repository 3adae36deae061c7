//! Configuration loading, layering and validation.
//!
//! Sources, highest precedence first:
//! - explicit command-line flags ([`CliOverrides`])
//! - the TOML file given with `--config`
//! - environment fallbacks (`YOUTUBE_API_KEY`, `HACKRTV_API_TOKEN`) for
//!   fields that are still empty
//! - built-in defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable consulted for the YouTube API key.
pub const YOUTUBE_API_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// Environment variable consulted for the hackr.tv API token.
pub const HACKRTV_TOKEN_ENV: &str = "HACKRTV_API_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// Forward Twitch/YouTube chat into hackr.tv.
    #[serde(default)]
    pub bridge: bool,

    /// Twitch settings.
    #[serde(default)]
    pub twitch: TwitchConfig,

    /// YouTube settings.
    #[serde(default)]
    pub youtube: YouTubeConfig,

    /// hackr.tv settings.
    #[serde(default)]
    pub hackrtv: HackrTvConfig,

    /// Diagnostic logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Twitch settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TwitchConfig {
    /// Channel to watch; empty disables Twitch.
    #[serde(default)]
    pub channel: String,
}

/// YouTube settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct YouTubeConfig {
    /// Live stream video id; empty disables YouTube.
    #[serde(default)]
    pub video_id: String,

    /// Data API key.
    #[serde(default)]
    pub api_key: String,
}

/// hackr.tv settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HackrTvConfig {
    /// ActionCable URL, e.g. `wss://hackr.tv/cable`; empty disables hackr.tv.
    #[serde(default)]
    pub url: String,

    /// Chat channel slug.
    #[serde(default = "default_hackrtv_channel")]
    pub channel: String,

    /// Per-hackr API token (needed for bridging).
    #[serde(default)]
    pub token: String,

    /// Hackr alias the token belongs to; bridged messages are posted as it.
    #[serde(default = "default_hackrtv_alias")]
    pub alias: String,
}

impl Default for HackrTvConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            channel: default_hackrtv_channel(),
            token: String::new(),
            alias: default_hackrtv_alias(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated JSON logs; unset means stderr only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

// Default value functions for serde

fn default_hackrtv_channel() -> String {
    "live".to_owned()
}
fn default_hackrtv_alias() -> String {
    "relay".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}

/// Values given explicitly on the command line. `None` means "not passed".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--twitch-channel`
    pub twitch_channel: Option<String>,
    /// `--youtube-video-id`
    pub youtube_video_id: Option<String>,
    /// `--youtube-api-key`
    pub youtube_api_key: Option<String>,
    /// `--hackrtv-url`
    pub hackrtv_url: Option<String>,
    /// `--hackrtv-channel`
    pub hackrtv_channel: Option<String>,
    /// `--hackrtv-token`
    pub hackrtv_token: Option<String>,
    /// `--hackrtv-alias`
    pub hackrtv_alias: Option<String>,
    /// `--bridge`
    pub bridge: Option<bool>,
    /// `--log-dir`
    pub log_dir: Option<PathBuf>,
}

/// Reasons a configuration cannot be run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Nothing to watch.
    #[error(
        "at least one platform is required (--twitch-channel, --youtube-video-id, or --hackrtv-url)"
    )]
    NoPlatform,

    /// YouTube configured without a key.
    #[error("--youtube-api-key (or {YOUTUBE_API_KEY_ENV} env) is required for YouTube")]
    MissingYouTubeKey,

    /// Bridging needs somewhere to send to.
    #[error("--bridge requires --hackrtv-url and --hackrtv-token")]
    BridgeRequiresHackrTv,
}

impl Config {
    /// Replace fields with every flag that was explicitly given.
    pub fn apply_overrides(&mut self, cli: &CliOverrides) {
        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *field = v.clone();
            }
        }
        set(&mut self.twitch.channel, &cli.twitch_channel);
        set(&mut self.youtube.video_id, &cli.youtube_video_id);
        set(&mut self.youtube.api_key, &cli.youtube_api_key);
        set(&mut self.hackrtv.url, &cli.hackrtv_url);
        set(&mut self.hackrtv.channel, &cli.hackrtv_channel);
        set(&mut self.hackrtv.token, &cli.hackrtv_token);
        set(&mut self.hackrtv.alias, &cli.hackrtv_alias);
        set(&mut self.bridge, &cli.bridge);
        if cli.log_dir.is_some() {
            self.logging.dir.clone_from(&cli.log_dir);
        }
    }

    /// Fill still-empty secrets from the environment.
    ///
    /// `lookup` is normally `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.youtube.api_key.is_empty() {
            if let Some(key) = lookup(YOUTUBE_API_KEY_ENV) {
                self.youtube.api_key = key;
            }
        }
        if self.hackrtv.token.is_empty() {
            if let Some(token) = lookup(HACKRTV_TOKEN_ENV) {
                self.hackrtv.token = token;
            }
        }
    }

    /// Check the configuration is runnable.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twitch.channel.is_empty()
            && self.youtube.video_id.is_empty()
            && self.hackrtv.url.is_empty()
        {
            return Err(ConfigError::NoPlatform);
        }
        if !self.youtube.video_id.is_empty() && self.youtube.api_key.is_empty() {
            return Err(ConfigError::MissingYouTubeKey);
        }
        if self.bridge && (self.hackrtv.url.is_empty() || self.hackrtv.token.is_empty()) {
            return Err(ConfigError::BridgeRequiresHackrTv);
        }
        Ok(())
    }

    /// hackr.tv token, if one is configured.
    pub fn hackrtv_token(&self) -> Option<String> {
        Some(self.hackrtv.token.clone()).filter(|t| !t.is_empty())
    }
}

/// Load a config from a TOML file.
///
/// Missing sections and fields take their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}
