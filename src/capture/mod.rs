//! Capture-side boundary of the pipeline.
//!
//! A [`CaptureSource`] hands out one [`CapturedFrame`] per call: either the
//! L2–L4 facts of a frame or the error the capture layer hit reading it.
//! Sources keep their own counters ([`CaptureStats`]) which are read after
//! capture stops.

pub mod decode;
pub mod pcap_file;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;
use std::net::IpAddr;
use tokio::sync::mpsc;

pub use decode::decode_frame;
pub use pcap_file::PcapFileSource;

/// Header facts extracted from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPacket {
    pub is_ipv4: bool,
    pub is_ipv6: bool,
    pub is_tcp: bool,
    pub is_udp: bool,
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    /// A header was cut short; fields past the cut are missing
    pub truncated: bool,
}

impl DecodedPacket {
    pub fn tcp(src: IpAddr, dst: IpAddr) -> Self {
        Self::ip(src, dst).with_tcp()
    }

    pub fn udp(src: IpAddr, dst: IpAddr) -> Self {
        Self::ip(src, dst).with_udp()
    }

    /// Bare IP packet, version taken from `src`.
    pub fn ip(src: IpAddr, dst: IpAddr) -> Self {
        Self {
            is_ipv4: src.is_ipv4(),
            is_ipv6: src.is_ipv6(),
            src: Some(src),
            dst: Some(dst),
            ..Default::default()
        }
    }

    fn with_tcp(mut self) -> Self {
        self.is_tcp = true;
        self
    }

    fn with_udp(mut self) -> Self {
        self.is_udp = true;
        self
    }

    pub fn is_ip(&self) -> bool {
        self.is_ipv4 || self.is_ipv6
    }
}

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub captured_at: DateTime<Local>,
    pub result: Result<DecodedPacket, CaptureError>,
}

impl CapturedFrame {
    pub fn decoded(packet: DecodedPacket) -> Self {
        Self {
            captured_at: Local::now(),
            result: Ok(packet),
        }
    }

    pub fn failed(error: CaptureError) -> Self {
        Self {
            captured_at: Local::now(),
            result: Err(error),
        }
    }
}

/// Point-in-time counters of a capture source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub queue_freezes: u64,
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames captured, {} dropped, {} queue freezes",
            self.total_frames, self.dropped_frames, self.queue_freezes
        )
    }
}

#[async_trait]
pub trait CaptureSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Option<CapturedFrame>;

    fn stats(&self) -> CaptureStats;

    /// Releases the underlying handle. Called once on the owning worker's
    /// exit path.
    async fn close(&mut self) {}
}

/// Opens the source named by `[capture]`. Only file replay is built in.
pub fn open_configured(config: &CaptureConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    match &config.pcap_file {
        Some(path) => {
            tracing::info!("📼 Replaying capture file {}", path);
            Ok(Box::new(PcapFileSource::open(path)?))
        }
        None => Err(CaptureError::LiveUnsupported(config.interface.clone())),
    }
}

/// Frames pushed by someone else, e.g. an embedder that owns a live socket.
pub struct ChannelSource {
    frames: mpsc::Receiver<CapturedFrame>,
    stats: CaptureStats,
}

impl ChannelSource {
    pub fn new(frames: mpsc::Receiver<CapturedFrame>) -> Self {
        Self {
            frames,
            stats: CaptureStats::default(),
        }
    }

    /// Sender/source pair with the given queue bound.
    pub fn channel(capacity: usize) -> (mpsc::Sender<CapturedFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl CaptureSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<CapturedFrame> {
        let frame = self.frames.recv().await?;
        self.stats.total_frames += 1;
        Some(frame)
    }

    fn stats(&self) -> CaptureStats {
        self.stats
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}
