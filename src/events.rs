//! Events, reputation updates and their fan-out to sinks.
//!
//! The engine worker publishes into an [`EventHub`]; every sink holds its
//! own broadcast receiver. Publishing never blocks the engine. A sink that
//! falls more than the channel capacity behind skips the overflow and
//! logs how much it lost.

use crate::reputation::ReputationRecord;
use crate::tagger::TaggedPacket;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// After cancellation a sink keeps reading for this long so the engine's
/// final event still reaches it.
const SINK_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventLevel {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventLevel::Critical => "CRIT",
            EventLevel::Warning => "WRN",
            EventLevel::Info => "I",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub level: EventLevel,
    pub message: String,
    /// The packet that triggered the event, if any
    pub packet: Option<Arc<TaggedPacket>>,
}

impl Event {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            packet: None,
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Critical, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    pub fn with_packet(mut self, packet: Arc<TaggedPacket>) -> Self {
        self.packet = Some(packet);
        self
    }
}

/// Per-packet delta of one reputation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationUpdate {
    pub record: ReputationRecord,
    /// First sighting of this address
    pub is_new: bool,
}

/// One output of the engine, in emission order.
#[derive(Debug, Clone)]
pub enum Emission {
    Event(Event),
    Reputation(ReputationUpdate),
}

impl Emission {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Emission::Event(event) => Some(event),
            Emission::Reputation(_) => None,
        }
    }

    pub fn as_update(&self) -> Option<&ReputationUpdate> {
        match self {
            Emission::Reputation(update) => Some(update),
            Emission::Event(_) => None,
        }
    }
}

/// Broadcast fan-out for events and reputation updates.
#[derive(Clone)]
pub struct EventHub {
    events: broadcast::Sender<Event>,
    reputation: broadcast::Sender<ReputationUpdate>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (reputation, _) = broadcast::channel(capacity);
        Self { events, reputation }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn subscribe_reputation(&self) -> broadcast::Receiver<ReputationUpdate> {
        self.reputation.subscribe()
    }

    pub fn publish(&self, emission: Emission) {
        match emission {
            Emission::Event(event) => self.publish_event(event),
            Emission::Reputation(update) => {
                // No subscribers is fine
                let _ = self.reputation.send(update);
            }
        }
    }

    pub fn publish_event(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Short `src -> dst (proto)` description of a packet for log lines.
pub fn describe_packet(packet: &TaggedPacket) -> String {
    let endpoint = |ip: Option<std::net::IpAddr>| {
        ip.map(|ip| ip.to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    let proto = match (packet.is_tcp, packet.is_udp, packet.is_ipv4, packet.is_ipv6) {
        (true, _, _, _) => "tcp",
        (_, true, _, _) => "udp",
        (_, _, true, _) => "ipv4",
        (_, _, _, true) => "ipv6",
        _ => "non-ip",
    };
    format!("{} -> {} ({})", endpoint(packet.src), endpoint(packet.dst), proto)
}

fn log_event(event: &Event) {
    let packet = event
        .packet
        .as_deref()
        .map(describe_packet)
        .unwrap_or_default();
    match event.level {
        EventLevel::Critical => error!(packet = %packet, "{:<4} {}", event.level, event.message),
        EventLevel::Warning => warn!(packet = %packet, "{:<4} {}", event.level, event.message),
        EventLevel::Info => info!(packet = %packet, "{:<4} {}", event.level, event.message),
    }
}

fn log_update(update: &ReputationUpdate) {
    let record = &update.record;
    debug!(
        "reputation {} trusted={} guard={} packets={}{}",
        record.address,
        record.trusted,
        record.is_guard,
        record.packet_count,
        if update.is_new { " (new)" } else { "" }
    );
}

/// Reads `rx` until the hub closes or `token` is cancelled, handing each
/// message to `handle`.
async fn run_sink<T, F>(
    name: &'static str,
    mut rx: broadcast::Receiver<T>,
    token: CancellationToken,
    mut handle: F,
) where
    T: Clone,
    F: FnMut(&T),
{
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => handle(&message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️  {} sink fell behind, skipped {} messages", name, skipped)
                }
                Err(RecvError::Closed) => break,
            },
            _ = token.cancelled() => {
                while let Ok(received) = tokio::time::timeout(SINK_DRAIN_GRACE, rx.recv()).await {
                    match received {
                        Ok(message) => handle(&message),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("⚠️  {} sink fell behind, skipped {} messages", name, skipped)
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                break;
            }
        }
    }
    debug!("{} sink stopped", name);
}

/// Renders every event as a log record at the matching level.
pub fn spawn_event_log_sink(
    rx: broadcast::Receiver<Event>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_sink("event", rx, token, log_event))
}

pub fn spawn_reputation_log_sink(
    rx: broadcast::Receiver<ReputationUpdate>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_sink("reputation", rx, token, log_update))
}
