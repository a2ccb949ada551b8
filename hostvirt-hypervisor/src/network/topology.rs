//! Topology facts derived from a network document.
//!
//! All functions are pure: they take the XML description handed out by the
//! control plane and keep nothing after returning.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::debug;

use crate::error::{HypervisorError, Result};
use crate::xml::{parse_ipv4, NetworkDocument};
use super::types::{DhcpRange, FixedReservation, ForwardInfo, Subnet};

/// Dotted netmask for a CIDR prefix length.
pub fn prefix_to_netmask(prefix: u8) -> Result<Ipv4Addr> {
    if prefix > 32 {
        return Err(HypervisorError::InvalidSpec(format!(
            "prefix length {} is longer than 32",
            prefix
        )));
    }
    // `prefix` ones followed by zeros.
    let bits = match prefix {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n)),
    };
    Ok(Ipv4Addr::from(bits))
}

/// CIDR prefix length of a dotted netmask.
pub fn netmask_to_prefix(netmask: Ipv4Addr) -> Result<u8> {
    ipnet::ipv4_mask_to_prefix(netmask).map_err(|_| {
        HypervisorError::InvalidSpec(format!("netmask {} is not contiguous", netmask))
    })
}

/// IPv4 subnet of the network, `None` when the document has no IPv4 `ip`
/// element.
///
/// The netmask comes from the `prefix` attribute when present, otherwise from
/// `netmask`. Without either the subnet is the single gateway address.
pub fn subnet_of(xml: &str) -> Result<Option<Subnet>> {
    subnet_of_document(&NetworkDocument::parse(xml)?)
}

pub(crate) fn subnet_of_document(doc: &NetworkDocument) -> Result<Option<Subnet>> {
    let ip = match doc.ipv4() {
        Some(ip) => ip,
        None => return Ok(None),
    };
    let gateway = match ip.address.as_deref() {
        Some(address) => parse_ipv4("gateway", address)?,
        None => return Ok(None),
    };

    let netmask = match (ip.prefix.as_deref(), ip.netmask.as_deref()) {
        (Some(prefix), _) => {
            let prefix: u8 = prefix.trim().parse().map_err(|_| {
                HypervisorError::XmlError(format!("invalid prefix '{}'", prefix))
            })?;
            Some(prefix_to_netmask(prefix)?)
        }
        (None, Some(netmask)) => Some(parse_ipv4("netmask", netmask)?),
        (None, None) => None,
    };

    let subnet = match netmask {
        Some(netmask) => {
            let prefix = netmask_to_prefix(netmask)?;
            let network = Ipv4Addr::from(u32::from(gateway) & u32::from(netmask));
            Subnet {
                gateway,
                netmask,
                network: Ipv4Net::new(network, prefix)
                    .map_err(|e| HypervisorError::XmlError(e.to_string()))?,
            }
        }
        None => Subnet {
            gateway,
            netmask: Ipv4Addr::BROADCAST,
            network: Ipv4Net::from(gateway),
        },
    };

    Ok(Some(subnet))
}

/// First DHCP range of the IPv4 configuration.
pub fn dhcp_range_of(xml: &str) -> Result<Option<DhcpRange>> {
    dhcp_range_of_document(&NetworkDocument::parse(xml)?)
}

pub(crate) fn dhcp_range_of_document(doc: &NetworkDocument) -> Result<Option<DhcpRange>> {
    let range = match doc
        .ipv4()
        .and_then(|ip| ip.dhcp.as_ref())
        .and_then(|dhcp| dhcp.range.first())
    {
        Some(range) => range,
        None => return Ok(None),
    };

    match (range.start.as_deref(), range.end.as_deref()) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Ok(Some(DhcpRange::new(
            parse_ipv4("DHCP start", start)?,
            parse_ipv4("DHCP end", end)?,
        ))),
        _ => Err(HypervisorError::XmlError("incomplete DHCP range".into())),
    }
}

/// Forward mode and device.
pub fn forward_of(xml: &str) -> Result<ForwardInfo> {
    Ok(forward_of_document(&NetworkDocument::parse(xml)?))
}

pub(crate) fn forward_of_document(doc: &NetworkDocument) -> ForwardInfo {
    doc.forward
        .as_ref()
        .map(|f| ForwardInfo {
            mode: f.mode.clone().filter(|m| !m.is_empty()),
            dev: f.dev.clone().filter(|d| !d.is_empty()),
        })
        .unwrap_or_default()
}

/// Whether guests on the network can network-boot.
///
/// True for any forwarded network other than NAT, or when DHCP announces a
/// bootp file.
pub fn can_pxe(xml: &str) -> Result<bool> {
    Ok(can_pxe_document(&NetworkDocument::parse(xml)?))
}

pub(crate) fn can_pxe_document(doc: &NetworkDocument) -> bool {
    if let Some(mode) = forward_of_document(doc).mode {
        if mode != "nat" {
            return true;
        }
    }

    doc.ipv4()
        .and_then(|ip| ip.dhcp.as_ref())
        .and_then(|dhcp| dhcp.bootp.as_ref())
        .and_then(|bootp| bootp.file.as_deref())
        .map_or(false, |file| !file.is_empty())
}

/// Static DHCP host entries, in document order.
///
/// Entries without a MAC or an IPv4 address (IPv6 hosts, name-only
/// entries) are not reservations and are left out.
pub fn fixed_reservations_of(xml: &str) -> Result<Vec<FixedReservation>> {
    Ok(fixed_reservations_of_document(&NetworkDocument::parse(xml)?))
}

pub(crate) fn fixed_reservations_of_document(doc: &NetworkDocument) -> Vec<FixedReservation> {
    doc.ip
        .iter()
        .filter_map(|ip| ip.dhcp.as_ref())
        .flat_map(|dhcp| dhcp.host.iter())
        .filter_map(|host| {
            let mac = host.mac.as_deref()?;
            let address = host.ip.as_deref()?;
            match address.parse::<Ipv4Addr>() {
                Ok(address) => Some(FixedReservation {
                    address,
                    mac: mac.to_string(),
                }),
                Err(_) => {
                    debug!(mac = %mac, ip = %address, "Skipping non-IPv4 DHCP host");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAT_NETWORK: &str = r#"<network>
  <name>default</name>
  <forward mode='nat'/>
  <bridge name='virbr0' stp='on' delay='0'/>
  <ip address='192.168.1.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.1.100' end='192.168.1.200'/>
      <host mac='52:54:00:00:00:01' ip='192.168.1.101'/>
      <host mac='52:54:00:00:00:02' name='db'/>
      <host mac='52:54:00:00:00:03' ip='192.168.1.103'/>
    </dhcp>
  </ip>
</network>"#;

    #[test]
    fn test_prefix_netmask_round_trip() {
        assert_eq!(prefix_to_netmask(24).unwrap(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(0).unwrap(), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(prefix_to_netmask(32).unwrap(), Ipv4Addr::BROADCAST);
        assert_eq!(prefix_to_netmask(20).unwrap(), Ipv4Addr::new(255, 255, 240, 0));
        assert!(prefix_to_netmask(33).is_err());

        for prefix in 0..=32 {
            assert_eq!(netmask_to_prefix(prefix_to_netmask(prefix).unwrap()).unwrap(), prefix);
        }
    }

    #[test]
    fn test_subnet_from_netmask() {
        let subnet = subnet_of(NAT_NETWORK).unwrap().unwrap();

        assert_eq!(subnet.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(subnet.network_address(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(subnet.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet.to_string(), "192.168.1.0/255.255.255.0");
    }

    #[test]
    fn test_subnet_from_prefix() {
        let xml = "<network><name>n</name><ip address='10.20.30.40' prefix='24'/></network>";
        let subnet = subnet_of(xml).unwrap().unwrap();

        assert_eq!(subnet.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet.network_address(), Ipv4Addr::new(10, 20, 30, 0));
        assert_eq!(subnet.prefix_len(), 24);
    }

    #[test]
    fn test_subnet_without_mask_is_host_address() {
        let xml = "<network><name>n</name><ip address='10.1.1.1'/></network>";
        let subnet = subnet_of(xml).unwrap().unwrap();

        assert_eq!(subnet.network.to_string(), "10.1.1.1/32");
    }

    #[test]
    fn test_subnet_absent() {
        let xml = "<network><name>br</name><forward mode='bridge'/><bridge name='br0'/></network>";
        assert_eq!(subnet_of(xml).unwrap(), None);
        assert_eq!(dhcp_range_of(xml).unwrap(), None);
    }

    #[test]
    fn test_subnet_skips_ipv6() {
        let xml = "<network><name>n</name>\
                   <ip family='ipv6' address='fd00::1' prefix='64'/>\
                   <ip address='172.16.0.1' netmask='255.255.0.0'/></network>";
        let subnet = subnet_of(xml).unwrap().unwrap();
        assert_eq!(subnet.network.to_string(), "172.16.0.0/16");
    }

    #[test]
    fn test_dhcp_range() {
        let range = dhcp_range_of(NAT_NETWORK).unwrap().unwrap();
        assert_eq!(range.start, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(range.end, Ipv4Addr::new(192, 168, 1, 200));
    }

    #[test]
    fn test_incomplete_dhcp_range() {
        let xml = "<network><name>n</name><ip address='10.0.0.1' netmask='255.0.0.0'>\
                   <dhcp><range start='10.0.0.5'/></dhcp></ip></network>";
        assert!(matches!(dhcp_range_of(xml), Err(HypervisorError::XmlError(_))));
    }

    #[test]
    fn test_can_pxe() {
        let route = "<network><name>r</name><forward mode='route'/>\
                     <ip address='10.0.0.1' netmask='255.0.0.0'/></network>";
        assert!(can_pxe(route).unwrap());

        assert!(!can_pxe(NAT_NETWORK).unwrap());

        let nat_bootp = "<network><name>n</name><forward mode='nat'/>\
                         <ip address='10.0.0.1' netmask='255.0.0.0'><dhcp>\
                         <range start='10.0.0.2' end='10.0.0.9'/>\
                         <bootp file='pxelinux.0'/></dhcp></ip></network>";
        assert!(can_pxe(nat_bootp).unwrap());

        let isolated = "<network><name>i</name><ip address='10.0.0.1' netmask='255.0.0.0'/></network>";
        assert!(!can_pxe(isolated).unwrap());
    }

    #[test]
    fn test_forward_info() {
        let xml = "<network><name>r</name><forward mode='route' dev='eth1'/></network>";
        let forward = forward_of(xml).unwrap();
        assert_eq!(forward.mode.as_deref(), Some("route"));
        assert_eq!(forward.dev.as_deref(), Some("eth1"));

        assert_eq!(forward_of(NAT_NETWORK).unwrap().dev, None);
    }

    #[test]
    fn test_fixed_reservations_in_document_order() {
        let reservations = fixed_reservations_of(NAT_NETWORK).unwrap();

        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations[0].mac, "52:54:00:00:00:01");
        assert_eq!(reservations[0].address, Ipv4Addr::new(192, 168, 1, 101));
        assert_eq!(reservations[1].mac, "52:54:00:00:00:03");
        assert_eq!(reservations[1].address, Ipv4Addr::new(192, 168, 1, 103));
    }

    #[test]
    fn test_interleaved_dhcp_entries() {
        let xml = "<network><name>lab</name><forward mode='nat'/>\
                   <ip address='192.168.1.1' netmask='255.255.255.0'><dhcp>\
                   <range start='192.168.1.100' end='192.168.1.110'/>\
                   <host mac='52:54:00:00:00:01' ip='192.168.1.101'/>\
                   <range start='192.168.1.200' end='192.168.1.210'/>\
                   <host mac='52:54:00:00:00:02' ip='192.168.1.201'/>\
                   </dhcp></ip>\
                   <route address='10.0.0.0' prefix='8' gateway='192.168.1.254'/>\
                   <ip family='ipv6' address='fd00::1' prefix='64'/></network>";

        let subnet = subnet_of(xml).unwrap().unwrap();
        assert_eq!(subnet.network_address(), Ipv4Addr::new(192, 168, 1, 0));

        let range = dhcp_range_of(xml).unwrap().unwrap();
        assert_eq!(range.start, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(range.end, Ipv4Addr::new(192, 168, 1, 110));

        let macs: Vec<String> = fixed_reservations_of(xml)
            .unwrap()
            .into_iter()
            .map(|r| r.mac)
            .collect();
        assert_eq!(macs, vec!["52:54:00:00:00:01", "52:54:00:00:00:02"]);
    }
}
