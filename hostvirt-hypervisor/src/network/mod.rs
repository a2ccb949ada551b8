//! Virtual networks.
//!
//! This module provides:
//! - Network provisioning for isolated, NAT, routed and bridged networks
//! - Optional DHCP with static reservations for every address of the range
//! - Topology read-back (subnet, DHCP range, forwarding, PXE) from the
//!   network document

mod dhcp;
mod topology;
mod types;

pub use dhcp::{generate_mac, synthesize_reservations};
pub use topology::{
    can_pxe, dhcp_range_of, fixed_reservations_of, forward_of, netmask_to_prefix,
    prefix_to_netmask, subnet_of,
};
pub use types::*;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::lifecycle::LifecycleController;
use crate::traits::ControlPlane;
use crate::types::{ResourceKind, ResourceState};
use crate::xml::{network_xml, NetworkDocument};
use topology::{
    can_pxe_document, dhcp_range_of_document, fixed_reservations_of_document,
    forward_of_document, subnet_of_document,
};

const KIND: ResourceKind = ResourceKind::Network;

impl NetworkSpec {
    /// Recover the provisioning parameters from a network document.
    ///
    /// Static DHCP hosts only set `fixed_reservations`; their MACs are not
    /// part of the spec.
    pub fn from_xml(xml: &str) -> Result<NetworkSpec> {
        let doc = NetworkDocument::parse(xml)?;
        let forward = forward_of_document(&doc);
        let mode = ForwardMode::from_document(forward.mode.as_deref()).ok_or_else(|| {
            HypervisorError::XmlError(format!(
                "unsupported forward mode '{}'",
                forward.mode.as_deref().unwrap_or_default()
            ))
        })?;

        let mut spec = NetworkSpec::new(doc.name.clone(), mode);
        spec.openvswitch = doc
            .virtualport
            .as_ref()
            .map_or(false, |port| port.kind == "openvswitch");

        if mode == ForwardMode::Bridge {
            spec.bridge_device = doc.bridge.as_ref().and_then(|b| b.name.clone());
            return Ok(spec);
        }

        if let Some(subnet) = subnet_of_document(&doc)? {
            spec.gateway = Some(subnet.gateway);
            spec.netmask = Some(subnet.netmask);
        }
        spec.dhcp_range = dhcp_range_of_document(&doc)?;
        spec.fixed_reservations = !fixed_reservations_of_document(&doc).is_empty();

        Ok(spec)
    }
}

/// Provisions and inspects virtual networks.
pub struct NetworkManager {
    control: Arc<dyn ControlPlane>,
    lifecycle: LifecycleController,
}

impl NetworkManager {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            lifecycle: LifecycleController::new(control.clone()),
            control,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Define, start and autostart a network.
    ///
    /// Like pools, a network that fails after being defined is left as it
    /// is and the last completed step is logged.
    #[instrument(skip(self, spec), fields(network = %spec.name, mode = %spec.mode))]
    pub async fn provision(&self, spec: &NetworkSpec) -> Result<VirtualNetwork> {
        spec.validate()?;

        let reservations = if spec.fixed_reservations {
            match (spec.mode, spec.gateway, spec.dhcp_range) {
                (ForwardMode::Bridge, _, _) => {
                    return Err(HypervisorError::InvalidSpec(
                        "bridge networks have no DHCP to reserve addresses in".into(),
                    ))
                }
                (_, Some(gateway), Some(range)) => synthesize_reservations(gateway, range)?,
                _ => {
                    return Err(HypervisorError::InvalidSpec(
                        "fixed reservations need a DHCP range".into(),
                    ))
                }
            }
        } else {
            Vec::new()
        };

        let xml = network_xml(spec, &reservations)?;

        info!(reservations = reservations.len(), "Provisioning network");
        self.lifecycle.define(KIND, &spec.name, &xml).await?;

        let mut completed = "define";
        if let Err(e) = self.bring_up(&spec.name, &mut completed).await {
            warn!(last_step = completed, error = %e, "Network left partially provisioned");
            return Err(e);
        }

        info!("Network provisioned");
        self.describe(&spec.name).await
    }

    async fn bring_up(&self, name: &str, completed: &mut &'static str) -> Result<()> {
        self.lifecycle.start(KIND, name).await?;
        *completed = "start";
        self.lifecycle.set_autostart(KIND, name, true).await?;
        *completed = "autostart";
        Ok(())
    }

    async fn document(&self, name: &str) -> Result<NetworkDocument> {
        let xml = self.control.xml_desc(KIND, name).await?;
        NetworkDocument::parse(&xml)
    }

    /// Read a network back from the control plane.
    pub async fn describe(&self, name: &str) -> Result<VirtualNetwork> {
        let state = self.lifecycle.state(KIND, name).await?;
        if state == ResourceState::Undefined {
            return Err(HypervisorError::not_found(KIND, name));
        }

        let doc = self.document(name).await?;
        let forward = forward_of_document(&doc);

        Ok(VirtualNetwork {
            name: name.to_string(),
            uuid: self.control.uuid(KIND, name).await?,
            forward_mode: ForwardMode::from_document(forward.mode.as_deref()),
            forward_dev: forward.dev,
            bridge_device: self.bridge_device(name).await,
            autostart: self.control.autostart(KIND, name).await?,
            active: state == ResourceState::Active,
            subnet: subnet_of_document(&doc)?,
            dhcp_range: dhcp_range_of_document(&doc)?,
            fixed_reservations: fixed_reservations_of_document(&doc),
        })
    }

    /// Provisioning parameters of an existing network.
    pub async fn spec(&self, name: &str) -> Result<NetworkSpec> {
        let xml = self.control.xml_desc(KIND, name).await?;
        NetworkSpec::from_xml(&xml)
    }

    /// Names of running networks followed by stopped ones.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = self.control.list_active(KIND).await?;
        names.extend(self.control.list_defined(KIND).await?);
        Ok(names)
    }

    /// Name, state, bridge and forward mode of every network.
    pub async fn list_info(&self) -> Result<Vec<NetworkSummary>> {
        let mut summaries = Vec::new();
        for name in self.list().await? {
            let active = self.control.is_active(KIND, &name).await?;
            let forward = forward_of_document(&self.document(&name).await?);
            summaries.push(NetworkSummary {
                device: self.bridge_device(&name).await,
                forward: forward.mode,
                active,
                name,
            });
        }
        Ok(summaries)
    }

    /// Host bridge of the network, `None` when the control plane cannot
    /// tell (typically a network that has never run).
    pub async fn bridge_device(&self, name: &str) -> Option<String> {
        match self.control.network_bridge_name(name).await {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                debug!(network = %name, error = %e, "No bridge device");
                None
            }
        }
    }

    pub async fn forward(&self, name: &str) -> Result<ForwardInfo> {
        Ok(forward_of_document(&self.document(name).await?))
    }

    pub async fn subnet(&self, name: &str) -> Result<Option<Subnet>> {
        subnet_of_document(&self.document(name).await?)
    }

    pub async fn dhcp_range(&self, name: &str) -> Result<Option<DhcpRange>> {
        dhcp_range_of_document(&self.document(name).await?)
    }

    pub async fn can_pxe(&self, name: &str) -> Result<bool> {
        Ok(can_pxe_document(&self.document(name).await?))
    }

    pub async fn fixed_reservations(&self, name: &str) -> Result<Vec<FixedReservation>> {
        Ok(fixed_reservations_of_document(&self.document(name).await?))
    }

    pub async fn start(&self, name: &str) -> Result<ResourceState> {
        self.lifecycle.start(KIND, name).await
    }

    pub async fn stop(&self, name: &str) -> Result<ResourceState> {
        self.lifecycle.stop(KIND, name).await
    }

    pub async fn delete(&self, name: &str) -> Result<ResourceState> {
        self.lifecycle.delete(KIND, name).await
    }

    pub async fn set_autostart(&self, name: &str, enabled: bool) -> Result<()> {
        self.lifecycle.set_autostart(KIND, name, enabled).await
    }

    pub async fn autostart(&self, name: &str) -> Result<bool> {
        self.lifecycle.autostart(KIND, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use crate::mock::{MockControlPlane, MockFault};

    fn setup() -> (Arc<MockControlPlane>, NetworkManager) {
        let mock = Arc::new(MockControlPlane::new());
        (mock.clone(), NetworkManager::new(mock))
    }

    fn nat_spec() -> NetworkSpec {
        NetworkSpec::new("default", ForwardMode::Nat)
            .with_ip(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(255, 255, 255, 0))
            .with_dhcp(Ipv4Addr::new(192, 168, 1, 100), Ipv4Addr::new(192, 168, 1, 102))
    }

    #[tokio::test]
    async fn test_provision_nat_network() {
        let (_, networks) = setup();

        let network = networks.provision(&nat_spec()).await.unwrap();

        assert!(network.active);
        assert!(network.autostart);
        assert_eq!(network.forward_mode, Some(ForwardMode::Nat));
        assert_eq!(network.bridge_device.as_deref(), Some("virbr0"));
        assert_eq!(network.subnet.unwrap().to_string(), "192.168.1.0/255.255.255.0");
        assert_eq!(network.dhcp_range.unwrap().end, Ipv4Addr::new(192, 168, 1, 102));
        assert!(network.fixed_reservations.is_empty());
    }

    #[tokio::test]
    async fn test_provision_with_fixed_reservations() {
        let (_, networks) = setup();

        let network = networks
            .provision(&nat_spec().with_fixed_reservations())
            .await
            .unwrap();

        let addresses: Vec<_> = network.fixed_reservations.iter().map(|r| r.address).collect();
        assert_eq!(
            addresses,
            vec![
                Ipv4Addr::new(192, 168, 1, 100),
                Ipv4Addr::new(192, 168, 1, 101),
                Ipv4Addr::new(192, 168, 1, 102),
            ]
        );
        assert_eq!(networks.fixed_reservations("default").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fixed_reservations_need_range() {
        let (_, networks) = setup();
        let spec = NetworkSpec::new("n", ForwardMode::Route)
            .with_ip(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0))
            .with_fixed_reservations();

        let err = networks.provision(&spec).await.unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidSpec(_)));
        assert!(networks.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_bridge_network() {
        let (_, networks) = setup();
        let spec = NetworkSpec::new("lan", ForwardMode::Bridge)
            .with_bridge("br0")
            .with_openvswitch();

        let network = networks.provision(&spec).await.unwrap();

        assert_eq!(network.forward_mode, Some(ForwardMode::Bridge));
        assert_eq!(network.bridge_device.as_deref(), Some("br0"));
        assert_eq!(network.subnet, None);
        assert!(networks.can_pxe("lan").await.unwrap());
        assert_eq!(networks.spec("lan").await.unwrap(), spec);
    }

    #[tokio::test]
    async fn test_bridge_device_failure_is_none() {
        let (mock, networks) = setup();
        networks.provision(&nat_spec()).await.unwrap();

        mock.fail_next(MockFault::BridgeName);
        assert_eq!(networks.bridge_device("default").await, None);
        assert_eq!(networks.bridge_device("ghost").await, None);
    }

    #[tokio::test]
    async fn test_partial_network_provisioning() {
        let (mock, networks) = setup();
        mock.fail_next(MockFault::SetAutostart);

        let err = networks.provision(&nat_spec()).await.unwrap_err();
        assert!(matches!(err, HypervisorError::ControlPlane(_)));

        let network = networks.describe("default").await.unwrap();
        assert!(network.active);
        assert!(!network.autostart);
    }

    #[tokio::test]
    async fn test_list_info() {
        let (_, networks) = setup();
        networks.provision(&nat_spec()).await.unwrap();
        networks
            .provision(&NetworkSpec::new("iso", ForwardMode::Isolated)
                .with_ip(Ipv4Addr::new(10, 9, 0, 1), Ipv4Addr::new(255, 255, 0, 0)))
            .await
            .unwrap();
        networks.stop("iso").await.unwrap();

        let info = networks.list_info().await.unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "default");
        assert!(info[0].active);
        assert_eq!(info[0].forward.as_deref(), Some("nat"));
        assert_eq!(info[1].name, "iso");
        assert!(!info[1].active);
        assert_eq!(info[1].forward, None);
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let (_, networks) = setup();
        networks.provision(&nat_spec()).await.unwrap();

        networks.stop("default").await.unwrap();
        networks.delete("default").await.unwrap();
        assert!(networks.describe("default").await.unwrap_err().is_not_found());
    }
}
