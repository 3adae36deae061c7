//! Fan-out from the merged source channel to the display and bridge sinks.
//!
//! The display path always gets every (non-echo) message and may block; the
//! bridge path is best-effort and drops when its buffer is full so a slow
//! Uplink API never stalls the terminal.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{Message, Platform, BRIDGED_PLATFORMS};

/// Capacity of the source → dispatcher channel.
pub const SOURCE_BUFFER: usize = 100;

/// Capacity of the dispatcher → display channel.
pub const DISPLAY_BUFFER: usize = 100;

/// Capacity of the dispatcher → bridge channel.
pub const BRIDGE_BUFFER: usize = 100;

/// Whether `msg` is hackr.tv reflecting one of our own bridged messages.
///
/// True iff it comes from hackr.tv, was posted by `relay_alias`
/// (case-insensitive) and starts with a bridge tag such as `"[TTV] "`.
pub fn is_bridge_echo(msg: &Message, relay_alias: &str) -> bool {
    msg.platform == Platform::HackrTv
        && msg.username.to_lowercase() == relay_alias.to_lowercase()
        && BRIDGED_PLATFORMS
            .iter()
            .any(|p| msg.content.starts_with(&p.bridge_tag()))
}

/// Counters kept by the dispatcher over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages read from the source channel.
    pub received: u64,
    /// Messages handed to the display sink.
    pub displayed: u64,
    /// Messages queued for the bridge.
    pub bridged: u64,
    /// Messages dropped because the bridge buffer was full.
    pub bridge_dropped: u64,
    /// hackr.tv echoes of our own bridged messages that were discarded.
    pub echoes_suppressed: u64,
}

/// Routes each message to the display and, in bridge mode, to the uplink.
pub struct Dispatcher {
    relay_alias: String,
    display_tx: mpsc::Sender<Message>,
    bridge_tx: Option<mpsc::Sender<Message>>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher. Pass `bridge_tx` only when bridging is enabled.
    pub fn new(
        relay_alias: impl Into<String>,
        display_tx: mpsc::Sender<Message>,
        bridge_tx: Option<mpsc::Sender<Message>>,
    ) -> Self {
        Self {
            relay_alias: relay_alias.into(),
            display_tx,
            bridge_tx,
            stats: DispatchStats::default(),
        }
    }

    /// Drain `rx` until every source has hung up.
    ///
    /// Both sinks are closed on return (their senders are dropped), which
    /// lets the display and bridge tasks finish.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Message>) -> DispatchStats {
        while let Some(msg) = rx.recv().await {
            self.route(msg).await;
        }
        info!(
            received = self.stats.received,
            displayed = self.stats.displayed,
            bridged = self.stats.bridged,
            bridge_dropped = self.stats.bridge_dropped,
            echoes_suppressed = self.stats.echoes_suppressed,
            "dispatcher finished"
        );
        self.stats
    }

    async fn route(&mut self, msg: Message) {
        self.stats.received = self.stats.received.saturating_add(1);

        if self.bridge_tx.is_some() && is_bridge_echo(&msg, &self.relay_alias) {
            self.stats.echoes_suppressed = self.stats.echoes_suppressed.saturating_add(1);
            return;
        }

        let bridge_copy = match &self.bridge_tx {
            Some(_) if msg.platform != Platform::HackrTv => Some(msg.clone()),
            _ => None,
        };

        if self.display_tx.send(msg).await.is_ok() {
            self.stats.displayed = self.stats.displayed.saturating_add(1);
        } else {
            warn!("display sink closed, message not shown");
        }

        if let (Some(bridge_tx), Some(copy)) = (&self.bridge_tx, bridge_copy) {
            match bridge_tx.try_send(copy) {
                Ok(()) => self.stats.bridged = self.stats.bridged.saturating_add(1),
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    self.stats.bridge_dropped = self.stats.bridge_dropped.saturating_add(1);
                    debug!(
                        platform = %dropped.platform,
                        username = %dropped.username,
                        "bridge buffer full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("bridge sink closed");
                }
            }
        }
    }
}
