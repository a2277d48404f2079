//! Local topology source: which address/subnet pairs the capture interface
//! owns. Enumerating real OS interfaces is left to the embedder; the daemon
//! reads the participations from its config file.

use crate::error::TopologyError;
use crate::membership::{NetworkMembership, Participation};

pub trait TopologySource: Send + Sync {
    /// Address/subnet participations of `interface`. An unknown interface or
    /// one without addresses is an error.
    fn participations(&self, interface: &str) -> Result<Vec<Participation>, TopologyError>;

    fn membership(&self, interface: &str) -> Result<NetworkMembership, TopologyError> {
        self.participations(interface).map(NetworkMembership::new)
    }
}

/// Topology declared in `[capture]`: one interface name and its CIDRs.
#[derive(Debug, Clone)]
pub struct ConfiguredTopology {
    interface: String,
    networks: Vec<String>,
}

impl ConfiguredTopology {
    pub fn new(interface: impl Into<String>, networks: Vec<String>) -> Self {
        Self {
            interface: interface.into(),
            networks,
        }
    }
}

impl TopologySource for ConfiguredTopology {
    fn participations(&self, interface: &str) -> Result<Vec<Participation>, TopologyError> {
        if interface != self.interface {
            return Err(TopologyError::UnknownInterface(interface.to_string()));
        }
        if self.networks.is_empty() {
            return Err(TopologyError::NoAddresses(interface.to_string()));
        }
        let participations = self
            .networks
            .iter()
            .map(|n| n.parse::<Participation>())
            .collect::<Result<Vec<_>, _>>()?;

        for p in &participations {
            tracing::info!("Own IP: {} (interface {})", p, interface);
        }
        Ok(participations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_topology() {
        let topo = ConfiguredTopology::new(
            "eth0",
            vec!["192.168.1.20/24".to_string(), "fe80::1/64".to_string()],
        );
        let p = topo.participations("eth0").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].prefix(), 24);

        let m = topo.membership("eth0").unwrap();
        assert!(m.classify("192.168.1.20".parse().unwrap()).is_us);
    }

    #[test]
    fn test_unknown_interface_is_error() {
        let topo = ConfiguredTopology::new("eth0", vec!["10.0.0.2/8".to_string()]);
        assert!(matches!(
            topo.participations("wlan0"),
            Err(TopologyError::UnknownInterface(name)) if name == "wlan0"
        ));
    }

    #[test]
    fn test_no_addresses_is_error() {
        let topo = ConfiguredTopology::new("eth0", vec![]);
        assert!(matches!(
            topo.participations("eth0"),
            Err(TopologyError::NoAddresses(_))
        ));
    }

    #[test]
    fn test_bad_cidr_is_error() {
        let topo = ConfiguredTopology::new("eth0", vec!["10.0.0.300/8".to_string()]);
        assert!(matches!(
            topo.participations("eth0"),
            Err(TopologyError::InvalidNetwork { .. })
        ));
    }
}
