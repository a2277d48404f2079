use thiserror::Error;

/// Startup-fatal conditions. Anything surfacing as an `AppError` ends the
/// process before (or instead of) packet capture.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Local topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Relay directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to read directory cache {path}: {source}")]
    CacheRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write directory cache {path}: {source}")]
    CacheWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory fetch failed: {0}")]
    Fetch(String),

    #[error("Directory JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid relays_published timestamp '{value}' (expected YYYY-MM-DD HH:MM:SS)")]
    Timestamp { value: String },

    #[error("Directory refresh cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Interface '{0}' not found")]
    UnknownInterface(String),

    #[error("Interface '{0}' has no addresses")]
    NoAddresses(String),

    #[error("Invalid address/prefix '{value}': {reason}")]
    InvalidNetwork { value: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Failed to open capture source {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("ReadPacketData error: {0}")]
    Read(String),

    #[error("Unsupported link type {0}")]
    UnsupportedLinkType(i32),

    #[error("Live capture on {0} is not supported; set capture.pcap_file or pass --pcap")]
    LiveUnsupported(String),
}
