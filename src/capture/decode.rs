//! Ethernet / IPv4 / IPv6 / TCP / UDP header extraction.
//!
//! Only the fields the tagger needs are read. IPv6 extension headers are not
//! walked: TCP/UDP are recognised only as the immediate next header.

use super::DecodedPacket;
use crate::constants::wire::*;
use std::net::IpAddr;

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn ipv4_at(data: &[u8], at: usize) -> IpAddr {
    IpAddr::from([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn ipv6_at(data: &[u8], at: usize) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[at..at + 16]);
    IpAddr::from(octets)
}

/// Decodes one Ethernet II frame (optionally carrying a single 802.1Q tag).
pub fn decode_frame(data: &[u8]) -> DecodedPacket {
    let mut packet = DecodedPacket::default();

    if data.len() < ETHERNET_HEADER_LEN {
        packet.truncated = true;
        return packet;
    }
    let mut ethertype = read_u16(data, 12);
    let mut offset = ETHERNET_HEADER_LEN;
    if ethertype == ETHERTYPE_VLAN {
        if data.len() < offset + VLAN_TAG_LEN {
            packet.truncated = true;
            return packet;
        }
        ethertype = read_u16(data, offset + 2);
        offset += VLAN_TAG_LEN;
    }

    match ethertype {
        ETHERTYPE_IPV4 => decode_ipv4(data, offset, &mut packet),
        ETHERTYPE_IPV6 => decode_ipv6(data, offset, &mut packet),
        _ => {}
    }
    packet
}

fn decode_ipv4(data: &[u8], offset: usize, packet: &mut DecodedPacket) {
    if data.len() < offset + IPV4_MIN_HEADER_LEN || data[offset] >> 4 != 4 {
        packet.truncated = true;
        return;
    }
    packet.is_ipv4 = true;
    packet.src = Some(ipv4_at(data, offset + 12));
    packet.dst = Some(ipv4_at(data, offset + 16));

    let header_len = usize::from(data[offset] & 0x0f) * 4;
    let total_len = usize::from(read_u16(data, offset + 2));
    if header_len < IPV4_MIN_HEADER_LEN
        || data.len() < offset + header_len
        || data.len() < offset + total_len
    {
        packet.truncated = true;
        return;
    }

    // Non-first fragments carry no transport header
    let fragment_offset = read_u16(data, offset + 6) & 0x1fff;
    if fragment_offset != 0 {
        return;
    }
    let end = (offset + total_len).max(offset + header_len);
    decode_transport(&data[..end], offset + header_len, data[offset + 9], packet);
}

fn decode_ipv6(data: &[u8], offset: usize, packet: &mut DecodedPacket) {
    if data.len() < offset + IPV6_HEADER_LEN || data[offset] >> 4 != 6 {
        packet.truncated = true;
        return;
    }
    packet.is_ipv6 = true;
    packet.src = Some(ipv6_at(data, offset + 8));
    packet.dst = Some(ipv6_at(data, offset + 24));

    let payload_len = usize::from(read_u16(data, offset + 4));
    let end = offset + IPV6_HEADER_LEN + payload_len;
    if data.len() < end {
        packet.truncated = true;
        return;
    }
    decode_transport(&data[..end], offset + IPV6_HEADER_LEN, data[offset + 6], packet);
}

fn decode_transport(data: &[u8], offset: usize, protocol: u8, packet: &mut DecodedPacket) {
    match protocol {
        IPPROTO_TCP => {
            if data.len() < offset + TCP_MIN_HEADER_LEN {
                packet.truncated = true;
                return;
            }
            let data_offset = usize::from(data[offset + 12] >> 4) * 4;
            if data_offset < TCP_MIN_HEADER_LEN || data.len() < offset + data_offset {
                packet.truncated = true;
                return;
            }
            packet.is_tcp = true;
        }
        IPPROTO_UDP => {
            if data.len() < offset + UDP_HEADER_LEN {
                packet.truncated = true;
                return;
            }
            packet.is_udp = true;
        }
        _ => {}
    }
}
