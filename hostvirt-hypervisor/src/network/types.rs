//! Virtual network types.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::HypervisorError;

/// How a virtual network reaches the physical network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// No forwarding, guests only see each other and the host
    #[default]
    Isolated,
    /// Masqueraded behind the host address
    Nat,
    /// Routed without translation
    Route,
    /// Attached to an existing host bridge
    Bridge,
}

impl ForwardMode {
    /// Name used on the command line and in `<forward mode=''/>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Isolated => "none",
            ForwardMode::Nat => "nat",
            ForwardMode::Route => "route",
            ForwardMode::Bridge => "bridge",
        }
    }

    /// Value of the forward element's `mode` attribute, `None` when the
    /// element is omitted.
    pub fn forward_attr(&self) -> Option<&'static str> {
        match self {
            ForwardMode::Isolated => None,
            other => Some(other.as_str()),
        }
    }

    /// Map the forward `mode` attribute of a document. A missing forward
    /// element means isolated; modes this crate does not provision yield `None`.
    pub fn from_document(mode: Option<&str>) -> Option<Self> {
        match mode {
            None => Some(ForwardMode::Isolated),
            Some(m) => m.parse().ok(),
        }
    }
}

impl FromStr for ForwardMode {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "isolated" => Ok(ForwardMode::Isolated),
            "nat" => Ok(ForwardMode::Nat),
            "route" => Ok(ForwardMode::Route),
            "bridge" => Ok(ForwardMode::Bridge),
            other => Err(HypervisorError::InvalidSpec(format!(
                "unknown forward mode '{}'", other
            ))),
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive DHCP address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl DhcpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }
}

/// Static MAC-to-address binding handed out by DHCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedReservation {
    pub address: Ipv4Addr,
    pub mac: String,
}

/// IPv4 subnet of a virtual network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Address of the host side of the network
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Network address (`gateway & netmask`) with its prefix length
    pub network: Ipv4Net,
}

impl Subnet {
    pub fn network_address(&self) -> Ipv4Addr {
        self.network.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.network.prefix_len()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network.network(), self.netmask)
    }
}

/// Forwarding details of a network document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    /// Raw forward mode (`None` for isolated networks)
    pub mode: Option<String>,
    /// Physical device traffic is forwarded to
    pub dev: Option<String>,
}

/// Parameters for provisioning a virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub mode: ForwardMode,
    /// Host address on the network (required unless bridged)
    pub gateway: Option<Ipv4Addr>,
    /// Netmask of the network (required unless bridged)
    pub netmask: Option<Ipv4Addr>,
    pub dhcp_range: Option<DhcpRange>,
    /// Existing host bridge (bridge mode only)
    pub bridge_device: Option<String>,
    /// Attach through an Open vSwitch virtual port
    pub openvswitch: bool,
    /// Pin every address of the DHCP range to a generated MAC
    pub fixed_reservations: bool,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>, mode: ForwardMode) -> Self {
        Self {
            name: name.into(),
            mode,
            gateway: None,
            netmask: None,
            dhcp_range: None,
            bridge_device: None,
            openvswitch: false,
            fixed_reservations: false,
        }
    }

    pub fn with_ip(mut self, gateway: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self.netmask = Some(netmask);
        self
    }

    pub fn with_dhcp(mut self, start: Ipv4Addr, end: Ipv4Addr) -> Self {
        self.dhcp_range = Some(DhcpRange::new(start, end));
        self
    }

    pub fn with_bridge(mut self, device: impl Into<String>) -> Self {
        self.bridge_device = Some(device.into());
        self
    }

    pub fn with_openvswitch(mut self) -> Self {
        self.openvswitch = true;
        self
    }

    pub fn with_fixed_reservations(mut self) -> Self {
        self.fixed_reservations = true;
        self
    }

    /// Check that every field the forward mode needs is present and coherent.
    pub fn validate(&self) -> Result<(), HypervisorError> {
        if self.name.trim().is_empty() {
            return Err(HypervisorError::InvalidSpec("network name is required".into()));
        }

        if self.mode == ForwardMode::Bridge {
            return match self.bridge_device.as_deref() {
                Some(device) if !device.trim().is_empty() => Ok(()),
                _ => Err(HypervisorError::InvalidSpec(
                    "bridge networks require a bridge device".into(),
                )),
            };
        }

        let (gateway, netmask) = match (self.gateway, self.netmask) {
            (Some(gateway), Some(netmask)) => (gateway, netmask),
            _ => {
                return Err(HypervisorError::InvalidSpec(format!(
                    "{} networks require a gateway and a netmask",
                    self.mode
                )))
            }
        };

        let prefix = ipnet::ipv4_mask_to_prefix(netmask).map_err(|_| {
            HypervisorError::InvalidSpec(format!("netmask {} is not contiguous", netmask))
        })?;
        let subnet = Ipv4Net::new(gateway, prefix)
            .map_err(|e| HypervisorError::InvalidSpec(e.to_string()))?
            .trunc();

        if let Some(range) = self.dhcp_range {
            if u32::from(range.start) > u32::from(range.end) {
                return Err(HypervisorError::InvalidSpec(format!(
                    "DHCP range start {} is after its end {}",
                    range.start, range.end
                )));
            }
            if !subnet.contains(&range.start) || !subnet.contains(&range.end) {
                return Err(HypervisorError::InvalidSpec(format!(
                    "DHCP range {}-{} is outside {}",
                    range.start, range.end, subnet
                )));
            }
        }

        Ok(())
    }
}

/// A virtual network as read back from the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub name: String,
    pub uuid: String,
    /// `None` for forward modes this crate does not provision
    pub forward_mode: Option<ForwardMode>,
    pub forward_dev: Option<String>,
    pub bridge_device: Option<String>,
    pub autostart: bool,
    pub active: bool,
    pub subnet: Option<Subnet>,
    pub dhcp_range: Option<DhcpRange>,
    pub fixed_reservations: Vec<FixedReservation>,
}

/// One line of a network listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub name: String,
    pub active: bool,
    pub device: Option<String>,
    pub forward: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_mode_attr() {
        assert_eq!(ForwardMode::Isolated.forward_attr(), None);
        assert_eq!(ForwardMode::Nat.forward_attr(), Some("nat"));
        assert_eq!(ForwardMode::Bridge.forward_attr(), Some("bridge"));
    }

    #[test]
    fn test_forward_mode_from_document() {
        assert_eq!(ForwardMode::from_document(None), Some(ForwardMode::Isolated));
        assert_eq!(ForwardMode::from_document(Some("route")), Some(ForwardMode::Route));
        assert_eq!(ForwardMode::from_document(Some("passthrough")), None);
    }

    #[test]
    fn test_validate_requires_ip_unless_bridged() {
        let err = NetworkSpec::new("nat0", ForwardMode::Nat).validate().unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidSpec(_)));

        let err = NetworkSpec::new("br", ForwardMode::Bridge).validate().unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidSpec(_)));

        assert!(NetworkSpec::new("br", ForwardMode::Bridge)
            .with_bridge("br0")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_dhcp_range() {
        let base = NetworkSpec::new("n", ForwardMode::Route)
            .with_ip(Ipv4Addr::new(192, 168, 5, 1), Ipv4Addr::new(255, 255, 255, 0));

        assert!(base.clone()
            .with_dhcp(Ipv4Addr::new(192, 168, 5, 10), Ipv4Addr::new(192, 168, 5, 20))
            .validate()
            .is_ok());

        let reversed = base.clone()
            .with_dhcp(Ipv4Addr::new(192, 168, 5, 20), Ipv4Addr::new(192, 168, 5, 10));
        assert!(reversed.validate().is_err());

        let outside = base
            .with_dhcp(Ipv4Addr::new(192, 168, 6, 10), Ipv4Addr::new(192, 168, 6, 20));
        assert!(outside.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sparse_netmask() {
        let spec = NetworkSpec::new("n", ForwardMode::Nat)
            .with_ip(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 255, 0));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_subnet_display() {
        let subnet = Subnet {
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            network: "10.0.0.0/16".parse().unwrap(),
        };
        assert_eq!(subnet.to_string(), "10.0.0.0/255.255.0.0");
        assert_eq!(subnet.prefix_len(), 16);
    }
}
