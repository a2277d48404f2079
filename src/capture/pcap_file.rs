//! Offline capture: replays a legacy (libpcap) capture file.
//!
//! Reads are synchronous; the file is local and records are small.

use super::{decode_frame, CaptureSource, CaptureStats, CapturedFrame};
use crate::constants::wire::{LINKTYPE_ETHERNET, PCAP_MAX_READ_BUFFER, PCAP_READ_BUFFER};
use crate::error::CaptureError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

enum Step {
    Header { linktype: i32, nanosecond: bool },
    Record {
        ts_sec: u32,
        ts_frac: u32,
        cut_short: bool,
        data: Vec<u8>,
    },
    Skip,
    Eof,
    Incomplete,
    /// Next record does not fit in the read buffer
    TooSmall,
    Failed(String),
}

pub struct PcapFileSource {
    path: String,
    reader: LegacyPcapReader<File>,
    buffer_size: usize,
    nanosecond: bool,
    stats: CaptureStats,
    exhausted: bool,
}

impl PcapFileSource {
    /// Opens `path` and validates its global header. Only Ethernet captures
    /// are accepted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path_str = path.as_ref().display().to_string();
        let open_err = |reason: String| CaptureError::Open {
            path: path_str.clone(),
            reason,
        };

        let file = File::open(path.as_ref()).map_err(|e| open_err(e.to_string()))?;
        let reader = LegacyPcapReader::new(PCAP_READ_BUFFER, file)
            .map_err(|e| open_err(format!("not a legacy pcap file: {:?}", e)))?;

        let mut source = Self {
            path: path_str.clone(),
            reader,
            buffer_size: PCAP_READ_BUFFER,
            nanosecond: false,
            stats: CaptureStats::default(),
            exhausted: false,
        };

        loop {
            match source.step() {
                Step::Header {
                    linktype,
                    nanosecond,
                } => {
                    if linktype != LINKTYPE_ETHERNET {
                        return Err(CaptureError::UnsupportedLinkType(linktype));
                    }
                    source.nanosecond = nanosecond;
                    break;
                }
                Step::Incomplete => source.refill().map_err(open_err)?,
                Step::TooSmall => source.grow().map_err(open_err)?,
                Step::Failed(reason) => return Err(open_err(reason)),
                Step::Eof => return Err(open_err("empty capture file".to_string())),
                Step::Record { .. } | Step::Skip => {
                    return Err(open_err("missing global header".to_string()))
                }
            }
        }

        debug!("Opened capture file {}", source.path);
        Ok(source)
    }

    fn step(&mut self) -> Step {
        let (consumed, step) = match self.reader.next() {
            Ok((offset, block)) => {
                let step = match block {
                    PcapBlockOwned::LegacyHeader(header) => Step::Header {
                        linktype: header.network.0,
                        nanosecond: matches!(header.magic_number, 0xa1b2_3c4d | 0x4d3c_b2a1),
                    },
                    PcapBlockOwned::Legacy(record) => Step::Record {
                        ts_sec: record.ts_sec,
                        ts_frac: record.ts_usec,
                        cut_short: record.caplen < record.origlen,
                        data: record.data.to_vec(),
                    },
                    PcapBlockOwned::NG(_) => Step::Skip,
                };
                (offset, step)
            }
            Err(PcapError::Eof) => (0, Step::Eof),
            Err(PcapError::Incomplete(_)) => (0, Step::Incomplete),
            Err(PcapError::BufferTooSmall) => (0, Step::TooSmall),
            Err(e) => (0, Step::Failed(format!("{:?}", e))),
        };
        self.reader.consume(consumed);
        step
    }

    fn refill(&mut self) -> Result<(), String> {
        self.reader.refill().map_err(|e| format!("{:?}", e))
    }

    /// Doubles the read buffer (up to `PCAP_MAX_READ_BUFFER`) and pulls in
    /// the rest of the pending record.
    fn grow(&mut self) -> Result<(), String> {
        let wanted = self.buffer_size.saturating_mul(2);
        if wanted > PCAP_MAX_READ_BUFFER || !self.reader.grow(wanted) {
            return Err(format!(
                "record larger than the {} byte read buffer",
                self.buffer_size
            ));
        }
        debug!("Grew pcap read buffer to {} bytes", wanted);
        self.buffer_size = wanted;
        self.refill()
    }

    fn timestamp(&self, ts_sec: u32, ts_frac: u32) -> DateTime<Local> {
        let nanos = if self.nanosecond {
            ts_frac
        } else {
            ts_frac.saturating_mul(1000)
        };
        DateTime::from_timestamp(i64::from(ts_sec), nanos)
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(Local::now)
    }

    fn fail(&mut self, reason: String) -> CapturedFrame {
        warn!("⚠️  Capture file {} unreadable: {}", self.path, reason);
        self.exhausted = true;
        CapturedFrame::failed(CaptureError::Read(reason))
    }
}

#[async_trait]
impl CaptureSource for PcapFileSource {
    async fn next_frame(&mut self) -> Option<CapturedFrame> {
        let mut stalled = false;
        while !self.exhausted {
            match self.step() {
                Step::Record {
                    ts_sec,
                    ts_frac,
                    cut_short,
                    data,
                } => {
                    self.stats.total_frames += 1;
                    let mut packet = decode_frame(&data);
                    packet.truncated |= cut_short;
                    return Some(CapturedFrame {
                        captured_at: self.timestamp(ts_sec, ts_frac),
                        result: Ok(packet),
                    });
                }
                Step::Header { .. } | Step::Skip => continue,
                Step::Eof => {
                    debug!("End of capture file {}", self.path);
                    self.exhausted = true;
                }
                Step::Incomplete if stalled => {
                    return Some(self.fail("capture file ends mid-record".to_string()));
                }
                Step::Incomplete => {
                    stalled = true;
                    if let Err(reason) = self.refill() {
                        return Some(self.fail(reason));
                    }
                }
                Step::TooSmall => {
                    if let Err(reason) = self.grow() {
                        return Some(self.fail(reason));
                    }
                }
                Step::Failed(reason) => return Some(self.fail(reason)),
            }
        }
        None
    }

    fn stats(&self) -> CaptureStats {
        self.stats
    }

    async fn close(&mut self) {
        self.exhausted = true;
        debug!("Closed capture file {} ({})", self.path, self.stats);
    }
}
