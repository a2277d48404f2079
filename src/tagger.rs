//! Fact derivation for captured frames.
//!
//! The tagger records what a frame *is* relative to our topology. It never
//! decides what to do about it; the reputation engine owns that policy.

use crate::capture::{CapturedFrame, DecodedPacket};
use crate::error::CaptureError;
use crate::membership::{Membership, NetworkMembership};
use chrono::{DateTime, Local};
use std::net::IpAddr;

/// A captured frame annotated with direction, locality and validity facts.
/// Built once per frame and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedPacket {
    pub captured_at: Option<DateTime<Local>>,
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    /// The far end of the conversation when exactly one side is us
    pub com_partner: Option<IpAddr>,
    /// Set when the capture layer failed on this frame; other fields are
    /// then meaningless
    pub error: Option<CaptureError>,
    pub is_ipv4: bool,
    pub is_ipv6: bool,
    pub is_tcp: bool,
    pub is_udp: bool,
    pub is_truncated: bool,
    pub is_loopback_only: bool,
    /// Exactly one side is a loopback address
    pub is_loopback_mismatch: bool,
    pub src_is_us: bool,
    pub dst_is_us: bool,
    pub src_is_in_our_network: bool,
    pub dst_is_in_our_network: bool,
    pub src_is_multicast: bool,
    pub dst_is_multicast: bool,
}

impl TaggedPacket {
    pub fn is_ip(&self) -> bool {
        self.is_ipv4 || self.is_ipv6
    }

    /// At least one endpoint is exactly one of our addresses
    pub fn involves_us(&self) -> bool {
        self.src_is_us || self.dst_is_us
    }

    pub fn touches_our_network(&self) -> bool {
        self.src_is_in_our_network || self.dst_is_in_our_network
    }

    pub fn is_multicast(&self) -> bool {
        self.src_is_multicast || self.dst_is_multicast
    }
}

#[derive(Debug, Clone)]
pub struct PacketTagger {
    membership: NetworkMembership,
}

impl PacketTagger {
    pub fn new(membership: NetworkMembership) -> Self {
        Self { membership }
    }

    pub fn tag_frame(&self, frame: CapturedFrame) -> TaggedPacket {
        match frame.result {
            Ok(decoded) => self.tag(&decoded, frame.captured_at),
            Err(error) => Self::tag_error(error, frame.captured_at),
        }
    }

    /// A frame the capture layer could not read.
    pub fn tag_error(error: CaptureError, captured_at: DateTime<Local>) -> TaggedPacket {
        TaggedPacket {
            captured_at: Some(captured_at),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn tag(&self, decoded: &DecodedPacket, captured_at: DateTime<Local>) -> TaggedPacket {
        let mut packet = TaggedPacket {
            captured_at: Some(captured_at),
            src: decoded.src,
            dst: decoded.dst,
            is_ipv4: decoded.is_ipv4,
            is_ipv6: decoded.is_ipv6,
            is_tcp: decoded.is_tcp,
            is_udp: decoded.is_udp,
            is_truncated: decoded.truncated,
            ..Default::default()
        };

        let (src, dst) = match (decoded.src, decoded.dst) {
            (Some(src), Some(dst)) => (src, dst),
            _ => return packet,
        };

        packet.is_loopback_only = src.is_loopback() && dst.is_loopback();
        packet.is_loopback_mismatch = src.is_loopback() != dst.is_loopback();
        packet.src_is_multicast = src.is_multicast();
        packet.dst_is_multicast = dst.is_multicast();

        let Membership {
            is_us: src_is_us,
            is_in_our_network: src_in_net,
        } = self.membership.classify(src);
        let Membership {
            is_us: dst_is_us,
            is_in_our_network: dst_in_net,
        } = self.membership.classify(dst);
        packet.src_is_us = src_is_us;
        packet.dst_is_us = dst_is_us;
        packet.src_is_in_our_network = src_in_net;
        packet.dst_is_in_our_network = dst_in_net;

        // Both or neither side being us leaves the partner ambiguous
        packet.com_partner = match (src_is_us, dst_is_us) {
            (true, false) => Some(dst),
            (false, true) => Some(src),
            _ => None,
        };
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode::{decode_frame, frames};
    use crate::constants::wire::IPPROTO_TCP;
    use std::net::Ipv4Addr;

    fn tagger() -> PacketTagger {
        PacketTagger::new(NetworkMembership::new(vec![
            "192.168.1.20/24".parse().unwrap(),
            "fd00:1::20/64".parse().unwrap(),
        ]))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn tag(src: &str, dst: &str) -> TaggedPacket {
        tagger().tag(&DecodedPacket::tcp(ip(src), ip(dst)), Local::now())
    }

    #[test]
    fn test_outbound_partner_is_destination() {
        let p = tag("192.168.1.20", "198.51.100.7");
        assert!(p.src_is_us && !p.dst_is_us);
        assert!(p.src_is_in_our_network && !p.dst_is_in_our_network);
        assert_eq!(p.com_partner, Some(ip("198.51.100.7")));
        assert!(p.is_ipv4 && p.is_tcp);
    }

    #[test]
    fn test_inbound_partner_is_source() {
        let p = tag("2001:db8::7", "fd00:1::20");
        assert!(p.dst_is_us);
        assert_eq!(p.com_partner, Some(ip("2001:db8::7")));
    }

    #[test]
    fn test_both_sides_us_has_no_partner() {
        let t = PacketTagger::new(NetworkMembership::new(vec![
            "192.168.1.20/24".parse().unwrap(),
            "192.168.1.21/24".parse().unwrap(),
        ]));
        let p = t.tag(
            &DecodedPacket::tcp(ip("192.168.1.20"), ip("192.168.1.21")),
            Local::now(),
        );
        assert!(p.src_is_us && p.dst_is_us);
        assert_eq!(p.com_partner, None);
    }

    #[test]
    fn test_foreign_conversation_has_no_partner() {
        let p = tag("203.0.113.1", "198.51.100.7");
        assert!(!p.involves_us());
        assert!(!p.touches_our_network());
        assert_eq!(p.com_partner, None);
    }

    #[test]
    fn test_neighbour_traffic() {
        let p = tag("192.168.1.50", "192.168.1.51");
        assert!(!p.involves_us());
        assert!(p.src_is_in_our_network && p.dst_is_in_our_network);
    }

    #[test]
    fn test_loopback_flags() {
        let p = tag("127.0.0.1", "127.0.0.1");
        assert!(p.is_loopback_only);
        assert!(!p.is_loopback_mismatch);

        let p = tag("127.0.0.1", "192.168.1.20");
        assert!(!p.is_loopback_only);
        assert!(p.is_loopback_mismatch);

        let p = tag("::1", "::1");
        assert!(p.is_loopback_only);
    }

    #[test]
    fn test_multicast_flags_per_side() {
        let p = tag("192.168.1.50", "224.0.0.251");
        assert!(!p.src_is_multicast);
        assert!(p.dst_is_multicast);
        assert!(p.is_multicast());

        let p = tag("fd00:1::99", "ff02::fb");
        assert!(p.dst_is_multicast);
    }

    #[test]
    fn test_non_ip_records_flags_only() {
        let frame = decode_frame(&frames::arp());
        let p = tagger().tag(&frame, Local::now());
        assert!(!p.is_ip());
        assert!(p.src.is_none());
        assert!(!p.is_loopback_only);
        assert_eq!(p.com_partner, None);
    }

    #[test]
    fn test_error_frame() {
        let frame = CapturedFrame::failed(CaptureError::Read("socket closed".into()));
        let p = tagger().tag_frame(frame);
        assert!(p.error.is_some());
        assert!(!p.is_ip());
        assert!(p.captured_at.is_some());
    }

    #[test]
    fn test_truncated_is_recorded() {
        let bytes = frames::ipv4(
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(198, 51, 100, 7),
            IPPROTO_TCP,
        );
        let decoded = decode_frame(&bytes[..bytes.len() - 3]);
        let p = tagger().tag(&decoded, Local::now());
        assert!(p.is_truncated);
        assert_eq!(p.com_partner, Some(ip("198.51.100.7")));
    }
}
