//! Reputation engine: the single owner of the address -> reputation table.
//!
//! The engine is a plain struct driven by one worker. Nothing else reads or
//! writes the table, so no locking is involved; other tasks only see
//! [`ReputationUpdate`] copies published through the event hub.
//!
//! Trust is decided once, on first sighting, against whichever directory
//! snapshot the engine holds at that moment. Later directory updates do not
//! reclassify existing records. The table is never pruned.

use crate::constants::reputation::{TRUSTED_REPORT_EVERY, UNTRUSTED_REPORT_EVERY};
use crate::directory::RelaySnapshot;
use crate::events::{Emission, Event, ReputationUpdate};
use crate::tagger::TaggedPacket;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationRecord {
    pub address: IpAddr,
    /// Decided at creation, never revisited
    pub trusted: bool,
    /// Listed in the guard directory (same value as `trusted`)
    pub is_guard: bool,
    pub packet_count: u64,
}

/// How often repeat traffic is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReputationPolicy {
    pub trusted_report_every: u64,
    pub untrusted_report_every: u64,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self {
            trusted_report_every: TRUSTED_REPORT_EVERY,
            untrusted_report_every: UNTRUSTED_REPORT_EVERY,
        }
    }
}

/// Counters returned when the engine worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub packets_analysed: u64,
    pub tracked_addresses: usize,
    pub trusted_addresses: usize,
}

pub struct ReputationEngine {
    records: HashMap<IpAddr, ReputationRecord>,
    directory: Arc<RelaySnapshot>,
    policy: ReputationPolicy,
    packets_analysed: u64,
}

impl ReputationEngine {
    pub fn new(directory: Arc<RelaySnapshot>, policy: ReputationPolicy) -> Self {
        Self {
            records: HashMap::new(),
            directory,
            policy,
            packets_analysed: 0,
        }
    }

    /// Swaps in a newer directory. Only affects addresses seen from now on.
    pub fn replace_directory(&mut self, snapshot: Arc<RelaySnapshot>) {
        self.directory = snapshot;
    }

    pub fn record(&self, address: &IpAddr) -> Option<&ReputationRecord> {
        self.records.get(address)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            packets_analysed: self.packets_analysed,
            tracked_addresses: self.records.len(),
            trusted_addresses: self.records.values().filter(|r| r.trusted).count(),
        }
    }

    /// Applies one tagged packet and returns what it produced, in order.
    /// Anomalies become events; nothing here fails.
    pub fn analyze(&mut self, packet: TaggedPacket) -> Vec<Emission> {
        self.packets_analysed += 1;
        let packet = Arc::new(packet);
        let mut out = Vec::new();
        let mut emit = |event: Event| out.push(Emission::Event(event.with_packet(packet.clone())));

        // Error packets are reported and still run through the rules below
        if let Some(error) = &packet.error {
            emit(Event::critical(format!("Captured error packet: {}", error)));
        }
        if packet.is_truncated {
            emit(Event::warning("Truncated frame captured"));
        }

        if !packet.is_ip() || packet.is_loopback_only {
            return out;
        }

        if !packet.involves_us() {
            if !packet.touches_our_network() {
                emit(Event::critical(
                    "Neither src nor dst of captured packet are in our network",
                ));
                return out;
            } else if packet.is_multicast() {
                emit(Event::info("Local network multicast packet was captured"));
            } else {
                emit(Event::warning(
                    "Non-multicast packet that does not involve one of our addresses was captured",
                ));
                return out;
            }
        }

        let Some(partner) = packet.com_partner else {
            emit(Event::critical(
                "No com partner IP associated with tagged packet",
            ));
            return out;
        };

        match self.records.get_mut(&partner) {
            Some(record) => {
                record.packet_count += 1;
                out.push(Emission::Reputation(ReputationUpdate {
                    record: record.clone(),
                    is_new: false,
                }));
                if record.trusted {
                    if record.packet_count % self.policy.trusted_report_every == 0 {
                        out.push(Emission::Event(Event::info(format!(
                            "Captured {} good packets from/to {}",
                            record.packet_count, record.address
                        ))));
                    }
                } else if record.packet_count % self.policy.untrusted_report_every == 0 {
                    out.push(Emission::Event(Event::warning(format!(
                        "Captured {} BAD packets from/to {}",
                        record.packet_count, record.address
                    ))));
                }
            }
            None => {
                let is_guard = self.directory.contains_address(partner);
                let record = ReputationRecord {
                    address: partner,
                    trusted: is_guard,
                    is_guard,
                    packet_count: 1,
                };
                self.records.insert(partner, record.clone());
                out.push(Emission::Reputation(ReputationUpdate {
                    record,
                    is_new: true,
                }));
                let event = if is_guard {
                    Event::info(format!("New good connection to {}", partner))
                } else {
                    Event::critical(format!("New BAD connection to {}", partner))
                };
                out.push(Emission::Event(event.with_packet(packet.clone())));
            }
        }
        out
    }
}
