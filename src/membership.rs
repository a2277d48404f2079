//! Membership tests of an address against the locally-owned addresses and
//! the subnets they sit in.

use crate::error::TopologyError;
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// One local interface binding: the address we own plus the prefix length
/// of the subnet it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participation(IpNetwork);

impl Participation {
    pub fn new(address: IpAddr, prefix: u8) -> Result<Self, TopologyError> {
        IpNetwork::new(address, prefix)
            .map(Self)
            .map_err(|e| TopologyError::InvalidNetwork {
                value: format!("{}/{}", address, prefix),
                reason: e.to_string(),
            })
    }

    /// The exact address owned by this host.
    pub fn address(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix()
    }

    /// Prefix containment test against the subnet of this binding.
    pub fn network_contains(&self, ip: IpAddr) -> bool {
        self.0.contains(ip)
    }
}

impl FromStr for Participation {
    type Err = TopologyError;

    /// Parses `address/prefix`, e.g. `192.168.1.20/24` or `fe80::1/64`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains('/') {
            return Err(TopologyError::InvalidNetwork {
                value: s.to_string(),
                reason: "missing prefix length".to_string(),
            });
        }
        IpNetwork::from_str(s)
            .map(Self)
            .map_err(|e| TopologyError::InvalidNetwork {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for Participation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.ip(), self.0.prefix())
    }
}

/// Result of classifying one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Membership {
    pub is_us: bool,
    pub is_in_our_network: bool,
}

/// The set of locally-owned address/subnet pairs. Fixed for the life of the
/// process; nothing refreshes it once capture has started.
#[derive(Debug, Clone, Default)]
pub struct NetworkMembership {
    participations: Vec<Participation>,
}

impl NetworkMembership {
    pub fn new(participations: Vec<Participation>) -> Self {
        Self { participations }
    }

    pub fn participations(&self) -> &[Participation] {
        &self.participations
    }

    pub fn classify(&self, ip: IpAddr) -> Membership {
        let mut membership = Membership::default();
        for participation in &self.participations {
            if participation.address() == ip {
                membership.is_us = true;
                membership.is_in_our_network = true;
                break;
            }
            if participation.network_contains(ip) {
                membership.is_in_our_network = true;
            }
        }
        membership
    }
}
