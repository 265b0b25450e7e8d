//! Event bus
//!
//! Everything the engine wants a consumer to see goes through here. Any
//! number of subscribers (terminal printer, socket relay, tests) can listen
//! independently; a slow subscriber only loses its own backlog.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::amount::Amount;

const DEFAULT_CAPACITY: usize = 1024;

/// Named event channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Log,
    Balance,
    Claimed,
    Transferred,
    Error,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::Log => "log",
            EventChannel::Balance => "balance",
            EventChannel::Claimed => "claimed",
            EventChannel::Transferred => "transferred",
            EventChannel::Error => "error",
        }
    }
}

/// One balance line as published on the `balance` channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub asset: String,
    pub balance: Amount,
    pub asset_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum BotEvent {
    Log(String),
    Balance(Vec<BalanceView>),
    Claimed {
        id: String,
        amount: Amount,
        hash: String,
    },
    Transferred {
        amount: Amount,
        destination: String,
        hash: String,
    },
    Error(String),
}

impl BotEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            BotEvent::Log(_) => EventChannel::Log,
            BotEvent::Balance(_) => EventChannel::Balance,
            BotEvent::Claimed { .. } => EventChannel::Claimed,
            BotEvent::Transferred { .. } => EventChannel::Transferred,
            BotEvent::Error(_) => EventChannel::Error,
        }
    }
}

/// Broadcasting publisher, cheap to clone
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BotEvent) {
        let _ = self.tx.send(event);
    }

    /// Write a line to the tracing log and publish it, timestamped, on `log`
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.emit(BotEvent::Log(format!("[{}] {}", stamp, message)));
    }

    /// Write a warning to the tracing log and publish it on `error`
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.emit(BotEvent::Error(message));
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of the bus, optionally narrowed to one channel
pub struct EventSubscriber {
    rx: broadcast::Receiver<BotEvent>,
    filter: Option<EventChannel>,
}

impl EventSubscriber {
    /// Only yield events of `channel`
    pub fn only(mut self, channel: EventChannel) -> Self {
        self.filter = Some(channel);
        self
    }

    /// Next event, or `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<BotEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.filter.map_or(true, |c| c == event.channel()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[Events] Subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event without waiting
    pub fn try_recv(&mut self) -> Option<BotEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.filter.map_or(true, |c| c == event.channel()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("[Events] Subscriber lagged, {} events dropped", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
