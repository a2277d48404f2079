//! Global constants for guardwatch
//!
//! Defaults for everything the config file can override live here so that
//! the config module, tests and benches agree on the same numbers.

/// Guard relay directory
pub mod directory {
    /// Onionoo listing of every relay currently carrying the Guard flag
    pub const GUARDS_URL: &str = "https://onionoo.torproject.org/details?search=flag:Guard";

    /// Name of the cached directory body inside the data directory
    pub const CACHE_FILE_NAME: &str = "guards.json";

    /// A snapshot is fresh for this long after its publication time
    pub const FRESHNESS_MINUTES: i64 = 30;

    /// Wire format of `relays_published` (interpreted in local time)
    pub const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub const FETCH_TIMEOUT_SECS: u64 = 30;

    /// 0 disables the periodic refresher (startup-only directory)
    pub const REFRESH_INTERVAL_SECS: u64 = 0;
}

/// Reputation reporting cadence
pub mod reputation {
    /// Info event every Nth packet exchanged with a trusted partner
    pub const TRUSTED_REPORT_EVERY: u64 = 1000;

    /// Warning event every Nth packet exchanged with an untrusted partner
    pub const UNTRUSTED_REPORT_EVERY: u64 = 10;
}

/// Channel bounds between pipeline stages
pub mod pipeline {
    /// Capture worker -> engine worker hand-off queue
    pub const PACKET_QUEUE_CAPACITY: usize = 1000;

    /// Engine worker -> sinks broadcast capacity
    pub const EVENT_CHANNEL_CAPACITY: usize = 10_000;

    /// Externally pushed directory snapshots waiting for the engine
    pub const DIRECTORY_UPDATE_CAPACITY: usize = 4;

    /// How long shutdown waits for registered tasks
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
}

/// Frame decoding
pub mod wire {
    pub const ETHERNET_HEADER_LEN: usize = 14;
    pub const VLAN_TAG_LEN: usize = 4;
    pub const ETHERTYPE_IPV4: u16 = 0x0800;
    pub const ETHERTYPE_IPV6: u16 = 0x86DD;
    pub const ETHERTYPE_VLAN: u16 = 0x8100;
    pub const IPV4_MIN_HEADER_LEN: usize = 20;
    pub const IPV6_HEADER_LEN: usize = 40;
    pub const TCP_MIN_HEADER_LEN: usize = 20;
    pub const UDP_HEADER_LEN: usize = 8;
    pub const IPPROTO_TCP: u8 = 6;
    pub const IPPROTO_UDP: u8 = 17;

    /// pcap LINKTYPE_ETHERNET
    pub const LINKTYPE_ETHERNET: i32 = 1;

    /// Initial buffer for the pcap reader
    pub const PCAP_READ_BUFFER: usize = 65536;

    /// Ceiling for buffer growth when a record outgrows `PCAP_READ_BUFFER`
    pub const PCAP_MAX_READ_BUFFER: usize = 16 * 1024 * 1024;
}
