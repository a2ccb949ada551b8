//! XML documents understood by the control plane.
//!
//! Documents are written through [`quick_xml::Writer`], so every
//! caller-supplied value ends up as escaped text or attribute content and can
//! never change the shape of the document. Reading goes the other way through
//! `serde` models deserialized by `quick_xml::de`; unknown elements the
//! control plane adds on its own (uuid, mac, permissions, ...) are ignored.

use std::net::Ipv4Addr;

use quick_xml::events::BytesText;
use quick_xml::Writer;
use serde::Deserialize;

use crate::error::{HypervisorError, Result};
use crate::network::{FixedReservation, ForwardMode, NetworkSpec};
use crate::storage::VolumeFormat;

pub(crate) type XmlWriter = Writer<Vec<u8>>;

/// Write a document with a single root element.
pub(crate) fn render<F>(root: &str, attrs: &[(&str, &str)], body: F) -> Result<String>
where
    F: FnOnce(&mut XmlWriter) -> quick_xml::Result<()>,
{
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .create_element(root)
        .with_attributes(attrs.iter().copied())
        .write_inner_content(body)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| HypervisorError::XmlError(e.to_string()))
}

/// `<name>text</name>`
pub(crate) fn text_element(w: &mut XmlWriter, name: &str, text: &str) -> quick_xml::Result<()> {
    w.create_element(name).write_text_content(BytesText::new(text))?;
    Ok(())
}

/// `<name attr='value'/>`
pub(crate) fn empty_element(
    w: &mut XmlWriter,
    name: &str,
    attrs: &[(&str, &str)],
) -> quick_xml::Result<()> {
    w.create_element(name)
        .with_attributes(attrs.iter().copied())
        .write_empty()?;
    Ok(())
}

/// `<target><path>path</path></target>`
pub(crate) fn target_path(w: &mut XmlWriter, path: &str) -> quick_xml::Result<()> {
    w.create_element("target")
        .write_inner_content(|w| text_element(w, "path", path))?;
    Ok(())
}

pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HypervisorError::InvalidSpec(format!("{} is required", field)));
    }
    Ok(())
}

// =============================================================================
// Volumes
// =============================================================================

/// Build a volume document.
pub fn volume_xml(name: &str, capacity: u64, allocation: u64, format: VolumeFormat) -> Result<String> {
    require("volume name", name)?;

    render("volume", &[], |w| {
        text_element(w, "name", name)?;
        text_element(w, "capacity", &capacity.to_string())?;
        text_element(w, "allocation", &allocation.to_string())?;
        w.create_element("target").write_inner_content(|w| {
            empty_element(w, "format", &[("type", format.as_str())])
        })?;
        Ok(())
    })
}

// =============================================================================
// Networks
// =============================================================================

/// Build a network document.
///
/// `reservations` are written as static DHCP hosts and only make sense
/// together with a DHCP range.
pub fn network_xml(spec: &NetworkSpec, reservations: &[FixedReservation]) -> Result<String> {
    spec.validate()?;

    let bridge_attrs: Vec<(&str, &str)> = match spec.bridge_device.as_deref() {
        Some(device) if spec.mode == ForwardMode::Bridge => vec![("name", device)],
        _ => vec![("stp", "on"), ("delay", "0")],
    };

    let ip = match (spec.mode, spec.gateway, spec.netmask) {
        (ForwardMode::Bridge, _, _) => None,
        (_, Some(gateway), Some(netmask)) => Some((gateway.to_string(), netmask.to_string())),
        _ => None,
    };

    let range = spec
        .dhcp_range
        .map(|r| (r.start.to_string(), r.end.to_string()));

    let hosts: Vec<(String, String)> = reservations
        .iter()
        .map(|r| (r.mac.clone(), r.address.to_string()))
        .collect();

    render("network", &[], |w| {
        text_element(w, "name", &spec.name)?;

        if let Some(mode) = spec.mode.forward_attr() {
            empty_element(w, "forward", &[("mode", mode)])?;
        }

        empty_element(w, "bridge", &bridge_attrs)?;

        if spec.openvswitch {
            empty_element(w, "virtualport", &[("type", "openvswitch")])?;
        }

        if let Some((address, netmask)) = &ip {
            let ip_element = w
                .create_element("ip")
                .with_attributes([("address", address.as_str()), ("netmask", netmask.as_str())]);

            match &range {
                Some((start, end)) => {
                    ip_element.write_inner_content(|w| {
                        w.create_element("dhcp").write_inner_content(|w| {
                            empty_element(w, "range", &[("start", start.as_str()), ("end", end.as_str())])?;
                            for (mac, address) in &hosts {
                                empty_element(w, "host", &[("mac", mac.as_str()), ("ip", address.as_str())])?;
                            }
                            Ok::<(), quick_xml::Error>(())
                        })?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
                }
                None => {
                    ip_element.write_empty()?;
                }
            }
        }

        Ok(())
    })
}

// =============================================================================
// Document models
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeAttr {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathAttr {
    #[serde(rename = "@path")]
    pub path: String,
}

/// Storage pool document.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolDocument {
    #[serde(rename = "@type")]
    pub pool_type: String,
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub source: Option<PoolSourceDocument>,
    #[serde(default)]
    pub target: Option<TargetDocument>,
}

impl PoolDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn target_path(&self) -> Option<&str> {
        self.target.as_ref().and_then(|t| t.path.as_deref())
    }

    /// The `<source>` element, or an empty one if the document has none.
    pub fn source(&self) -> PoolSourceDocument {
        self.source.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolSourceDocument {
    #[serde(default)]
    pub device: Vec<PathAttr>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Vec<HostAttr>,
    #[serde(default)]
    pub dir: Option<PathAttr>,
    #[serde(default)]
    pub format: Option<TypeAttr>,
    #[serde(default)]
    pub auth: Option<AuthDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostAttr {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@port", default)]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthDocument {
    #[serde(rename = "@username")]
    pub username: String,
    #[serde(rename = "@type")]
    pub auth_type: String,
    #[serde(default)]
    pub secret: Option<SecretAttr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretAttr {
    #[serde(rename = "@uuid", default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetDocument {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: Option<TypeAttr>,
}

/// Size element (`<capacity unit='bytes'>1024</capacity>`).
#[derive(Debug, Clone, Deserialize)]
pub struct SizeElement {
    #[serde(rename = "$text")]
    pub value: u64,
    #[serde(rename = "@unit", default)]
    pub unit: Option<String>,
}

impl SizeElement {
    /// Size in bytes.
    pub fn bytes(&self) -> Result<u64> {
        let multiplier: u64 = match self.unit.as_deref() {
            None | Some("b") | Some("bytes") => 1,
            Some("KB") => 1000,
            Some("K") | Some("KiB") => 1 << 10,
            Some("MB") => 1000 * 1000,
            Some("M") | Some("MiB") => 1 << 20,
            Some("GB") => 1000 * 1000 * 1000,
            Some("G") | Some("GiB") => 1 << 30,
            Some("T") | Some("TiB") => 1 << 40,
            Some(other) => {
                return Err(HypervisorError::XmlError(format!("unknown size unit '{}'", other)))
            }
        };
        self.value
            .checked_mul(multiplier)
            .ok_or_else(|| HypervisorError::XmlError("size overflows 64 bits".to_string()))
    }
}

/// Storage volume document.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeDocument {
    pub name: String,
    #[serde(default)]
    pub capacity: Option<SizeElement>,
    #[serde(default)]
    pub allocation: Option<SizeElement>,
    #[serde(default)]
    pub target: Option<TargetDocument>,
}

impl VolumeDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Value of `target/format/@type`.
    pub fn format(&self) -> Option<&str> {
        self.target
            .as_ref()
            .and_then(|t| t.format.as_ref())
            .map(|f| f.kind.as_str())
    }

    pub fn capacity_bytes(&self) -> Result<u64> {
        self.capacity.as_ref().map(SizeElement::bytes).unwrap_or(Ok(0))
    }

    pub fn allocation_bytes(&self) -> Result<u64> {
        self.allocation.as_ref().map(SizeElement::bytes).unwrap_or(Ok(0))
    }
}

/// Virtual network document.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDocument {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub forward: Option<ForwardElement>,
    #[serde(default)]
    pub bridge: Option<BridgeElement>,
    #[serde(default)]
    pub virtualport: Option<TypeAttr>,
    #[serde(default)]
    pub ip: Vec<IpElement>,
}

impl NetworkDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// First IPv4 `<ip>` element.
    pub fn ipv4(&self) -> Option<&IpElement> {
        self.ip
            .iter()
            .find(|ip| matches!(ip.family.as_deref(), None | Some("ipv4")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardElement {
    #[serde(rename = "@mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "@dev", default)]
    pub dev: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeElement {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@stp", default)]
    pub stp: Option<String>,
    #[serde(rename = "@delay", default)]
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpElement {
    #[serde(rename = "@family", default)]
    pub family: Option<String>,
    #[serde(rename = "@address", default)]
    pub address: Option<String>,
    #[serde(rename = "@netmask", default)]
    pub netmask: Option<String>,
    #[serde(rename = "@prefix", default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub dhcp: Option<DhcpElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DhcpElement {
    #[serde(default)]
    pub range: Vec<RangeElement>,
    #[serde(default)]
    pub host: Vec<DhcpHostElement>,
    #[serde(default)]
    pub bootp: Option<BootpElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeElement {
    #[serde(rename = "@start", default)]
    pub start: Option<String>,
    #[serde(rename = "@end", default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhcpHostElement {
    #[serde(rename = "@mac", default)]
    pub mac: Option<String>,
    #[serde(rename = "@ip", default)]
    pub ip: Option<String>,
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootpElement {
    #[serde(rename = "@file", default)]
    pub file: Option<String>,
    #[serde(rename = "@server", default)]
    pub server: Option<String>,
}

/// Parse an IPv4 address attribute.
pub(crate) fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        HypervisorError::XmlError(format!("invalid {} address '{}'", field, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_xml() {
        let xml = volume_xml("data.img", 1024, 0, VolumeFormat::Qcow2).unwrap();

        assert!(xml.trim_start().starts_with("<volume>"));
        assert!(xml.contains("<name>data.img</name>"));
        assert!(xml.contains("<capacity>1024</capacity>"));
        assert!(xml.contains("<allocation>0</allocation>"));
        assert!(xml.contains(r#"<format type="qcow2"/>"#));

        let doc = VolumeDocument::parse(&xml).unwrap();
        assert_eq!(doc.name, "data.img");
        assert_eq!(doc.capacity_bytes().unwrap(), 1024);
        assert_eq!(doc.allocation_bytes().unwrap(), 0);
        assert_eq!(doc.format(), Some("qcow2"));
    }

    #[test]
    fn test_volume_xml_escapes_name() {
        let name = "evil</name><capacity>1</capacity><name>";
        let xml = volume_xml(name, 2048, 2048, VolumeFormat::Raw).unwrap();

        assert!(!xml.contains("<capacity>1</capacity>"));
        let doc = VolumeDocument::parse(&xml).unwrap();
        assert_eq!(doc.name, name);
        assert_eq!(doc.capacity_bytes().unwrap(), 2048);
    }

    #[test]
    fn test_network_xml_escapes_values() {
        let name = "lab'/><forward mode='bridge";
        let spec = NetworkSpec::new(name, ForwardMode::Isolated)
            .with_ip("10.10.0.1".parse().unwrap(), "255.255.255.0".parse().unwrap());
        let xml = network_xml(&spec, &[]).unwrap();

        assert!(!xml.contains("<forward"));
        assert_eq!(NetworkSpec::from_xml(&xml).unwrap(), spec);

        let spec = NetworkSpec::new("lan", ForwardMode::Bridge).with_bridge(r#"br0"/><x"#);
        let xml = network_xml(&spec, &[]).unwrap();

        assert!(!xml.contains("<x"));
        let doc = NetworkDocument::parse(&xml).unwrap();
        assert_eq!(doc.bridge.unwrap().name.as_deref(), Some(r#"br0"/><x"#));
        assert_eq!(NetworkSpec::from_xml(&xml).unwrap(), spec);
    }

    #[test]
    fn test_pool_xml_escapes_values() {
        use crate::storage::{DirectoryBackend, PoolSpec, RbdBackend};

        let target = "/srv/a</path></target><target><path>/etc";
        let spec: PoolSpec = DirectoryBackend::new(target).into();
        let xml = spec.pool_xml("images<x>").unwrap();

        assert!(!xml.contains("<path>/etc"));
        let (name, parsed) = PoolSpec::from_xml(&xml).unwrap();
        assert_eq!(name, "images<x>");
        assert_eq!(parsed, spec);

        let user = r#"admin" type="none"#;
        let spec: PoolSpec = RbdBackend::new("rbd", user, "2d5a7b3c-9e1f-4a6b-8c0d-1e2f3a4b5c6d")
            .with_host("mon1")
            .into();
        let xml = spec.pool_xml("ceph").unwrap();

        assert!(xml.contains(r#"type="ceph""#));
        assert!(!xml.contains(r#"type="none""#));
        assert_eq!(PoolSpec::from_xml(&xml).unwrap().1, spec);
    }

    #[test]
    fn test_volume_xml_requires_name() {
        let err = volume_xml("  ", 1, 1, VolumeFormat::Raw).unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidSpec(_)));
    }

    #[test]
    fn test_size_units() {
        let xml = "<volume><name>v</name><capacity unit='GiB'>2</capacity>\
                   <allocation unit='bytes'>512</allocation></volume>";
        let doc = VolumeDocument::parse(xml).unwrap();
        assert_eq!(doc.capacity_bytes().unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(doc.allocation_bytes().unwrap(), 512);
        assert_eq!(doc.format(), None);
    }

    #[test]
    fn test_isolated_network_xml() {
        let spec = NetworkSpec::new("isolated", ForwardMode::Isolated)
            .with_ip("10.10.0.1".parse().unwrap(), "255.255.255.0".parse().unwrap());
        let xml = network_xml(&spec, &[]).unwrap();

        assert!(!xml.contains("<forward"));
        assert!(xml.contains(r#"<bridge stp="on" delay="0"/>"#));
        assert!(xml.contains(r#"<ip address="10.10.0.1" netmask="255.255.255.0"/>"#));
        assert!(!xml.contains("virtualport"));
    }

    #[test]
    fn test_bridge_network_xml() {
        let spec = NetworkSpec::new("lan", ForwardMode::Bridge)
            .with_bridge("br0")
            .with_openvswitch();
        let xml = network_xml(&spec, &[]).unwrap();

        assert!(xml.contains(r#"<forward mode="bridge"/>"#));
        assert!(xml.contains(r#"<bridge name="br0"/>"#));
        assert!(!xml.contains("stp="));
        assert!(xml.contains(r#"<virtualport type="openvswitch"/>"#));
        assert!(!xml.contains("<ip"));
    }

    #[test]
    fn test_nat_network_with_dhcp_hosts() {
        let spec = NetworkSpec::new("default", ForwardMode::Nat)
            .with_ip("192.168.1.1".parse().unwrap(), "255.255.255.0".parse().unwrap())
            .with_dhcp("192.168.1.100".parse().unwrap(), "192.168.1.101".parse().unwrap());
        let hosts = vec![FixedReservation {
            address: "192.168.1.100".parse().unwrap(),
            mac: "52:54:00:aa:bb:cc".to_string(),
        }];
        let xml = network_xml(&spec, &hosts).unwrap();

        assert!(xml.contains(r#"<forward mode="nat"/>"#));
        assert!(xml.contains(r#"<range start="192.168.1.100" end="192.168.1.101"/>"#));
        assert!(xml.contains(r#"<host mac="52:54:00:aa:bb:cc" ip="192.168.1.100"/>"#));
    }

    #[test]
    fn test_network_document_ignores_extra_elements() {
        let xml = r#"<network connections='2'>
  <name>default</name>
  <uuid>8a1f4c5e-1b44-4f5e-9d3c-1c2b3a4d5e6f</uuid>
  <forward mode='nat'>
    <nat>
      <port start='1024' end='65535'/>
    </nat>
  </forward>
  <bridge name='virbr0' stp='on' delay='0'/>
  <mac address='52:54:00:0a:0b:0c'/>
  <ip address='192.168.122.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.122.2' end='192.168.122.254'/>
    </dhcp>
  </ip>
  <ip family='ipv6' address='fd00::1' prefix='64'/>
</network>"#;
        let doc = NetworkDocument::parse(xml).unwrap();

        assert_eq!(doc.name, "default");
        assert_eq!(doc.forward.as_ref().unwrap().mode.as_deref(), Some("nat"));
        assert_eq!(doc.bridge.as_ref().unwrap().name.as_deref(), Some("virbr0"));
        assert_eq!(doc.ip.len(), 2);
        assert_eq!(doc.ipv4().unwrap().address.as_deref(), Some("192.168.122.1"));
    }

    #[test]
    fn test_document_without_name() {
        let err = NetworkDocument::parse("<network><uuid>x</uuid></network>").unwrap_err();
        assert!(matches!(err, HypervisorError::XmlError(_)));
    }
}
