//! Worker wiring: capture worker -> bounded queue -> analysis worker -> hub.
//!
//! The analysis worker is the only owner of the [`ReputationEngine`]. It
//! merges three inputs (packets, directory snapshots, cancellation) into one
//! serial loop, so the reputation table needs no lock. The packet queue is
//! bounded: a slow engine blocks the capture worker instead of dropping.

use crate::capture::{CaptureSource, CaptureStats};
use crate::constants::directory::PUBLISHED_FORMAT;
use crate::constants::pipeline::{DIRECTORY_UPDATE_CAPACITY, PACKET_QUEUE_CAPACITY};
use crate::directory::RelaySnapshot;
use crate::error::AppError;
use crate::events::{describe_packet, Event, EventHub};
use crate::reputation::{EngineSummary, ReputationEngine};
use crate::tagger::{PacketTagger, TaggedPacket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Bound of the capture -> engine hand-off queue
    pub queue_capacity: usize,
    /// Log every tagged packet as it leaves the capture worker
    pub print_packets: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: PACKET_QUEUE_CAPACITY,
            print_packets: false,
        }
    }
}

/// What both workers returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub capture: CaptureStats,
    pub engine: EngineSummary,
}

/// Reads frames, tags them and hands them to the engine in capture order.
/// The source is closed on every exit path.
pub fn spawn_capture_worker(
    mut source: Box<dyn CaptureSource>,
    tagger: PacketTagger,
    packets: mpsc::Sender<TaggedPacket>,
    token: CancellationToken,
    print_packets: bool,
) -> JoinHandle<CaptureStats> {
    tokio::spawn(async move {
        debug!("Capture worker started");
        loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                frame = source.next_frame() => frame,
            };
            let Some(frame) = frame else {
                info!("Capture source exhausted");
                break;
            };

            let packet = tagger.tag_frame(frame);
            if print_packets {
                info!("📦 {}", describe_packet(&packet));
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = packets.send(packet) => {
                    if sent.is_err() {
                        debug!("Analysis worker gone, stopping capture");
                        break;
                    }
                }
            }
        }

        source.close().await;
        let stats = source.stats();
        info!("Capture stopped: {}", stats);
        stats
    })
}

/// Drives the engine until cancellation or until the packet stream closes.
/// A closed packet stream cancels `token` so the rest of the process
/// follows.
pub fn spawn_analysis_worker(
    mut engine: ReputationEngine,
    mut packets: mpsc::Receiver<TaggedPacket>,
    mut directory_updates: mpsc::Receiver<Arc<RelaySnapshot>>,
    hub: EventHub,
    token: CancellationToken,
) -> JoinHandle<EngineSummary> {
    tokio::spawn(async move {
        hub.publish_event(Event::info("Starting analysis"));

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    hub.publish_event(Event::critical("Stopping analysis - context cancelled"));
                    break;
                }
                Some(snapshot) = directory_updates.recv() => {
                    info!(
                        "🔄 Guard directory replaced (published {}, {} relays)",
                        snapshot.published().format(PUBLISHED_FORMAT),
                        snapshot.relays().len()
                    );
                    engine.replace_directory(snapshot);
                }
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        for emission in engine.analyze(packet) {
                            hub.publish(emission);
                        }
                    }
                    None => {
                        hub.publish_event(Event::critical("Stopping analysis - packet stream closed"));
                        token.cancel();
                        break;
                    }
                },
            }
        }

        let summary = engine.summary();
        info!(
            "Analysis stopped: {} packets, {} addresses tracked ({} trusted)",
            summary.packets_analysed, summary.tracked_addresses, summary.trusted_addresses
        );
        summary
    })
}

/// Running capture and analysis workers.
pub struct Pipeline {
    capture: JoinHandle<CaptureStats>,
    analysis: JoinHandle<EngineSummary>,
    directory_updates: mpsc::Sender<Arc<RelaySnapshot>>,
}

impl Pipeline {
    pub fn start(
        source: Box<dyn CaptureSource>,
        tagger: PacketTagger,
        engine: ReputationEngine,
        config: PipelineConfig,
        hub: &EventHub,
        token: CancellationToken,
    ) -> Self {
        let (packet_tx, packet_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (directory_tx, directory_rx) = mpsc::channel(DIRECTORY_UPDATE_CAPACITY);

        let analysis = spawn_analysis_worker(
            engine,
            packet_rx,
            directory_rx,
            hub.clone(),
            token.clone(),
        );
        let capture = spawn_capture_worker(source, tagger, packet_tx, token, config.print_packets);

        Self {
            capture,
            analysis,
            directory_updates: directory_tx,
        }
    }

    /// Sender for newer directory snapshots. Records created after a push
    /// are classified against the pushed snapshot.
    pub fn directory_updates(&self) -> mpsc::Sender<Arc<RelaySnapshot>> {
        self.directory_updates.clone()
    }

    /// Waits for both workers. Only returns once the token has been
    /// cancelled or the capture source is exhausted.
    pub async fn join(self) -> Result<PipelineReport, AppError> {
        let capture = self.capture.await?;
        let engine = self.analysis.await?;
        Ok(PipelineReport { capture, engine })
    }
}
