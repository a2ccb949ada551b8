//! Control-plane session abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ResourceKind;

/// Raw pool info tuple as reported by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolRuntimeInfo {
    /// Pool state code (0 inactive, 1 building, 2 running, 3 degraded, 4 inaccessible)
    pub state: u32,
    /// Total capacity in bytes
    pub capacity: u64,
    /// Allocated bytes
    pub allocation: u64,
    /// Free bytes
    pub available: u64,
}

/// Raw volume info tuple as reported by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeRuntimeInfo {
    /// Volume type code (file, block, network, ...)
    pub kind: u32,
    /// Logical size in bytes
    pub capacity: u64,
    /// Bytes actually allocated on the backend
    pub allocation: u64,
}

/// A session with the hypervisor's native control API.
///
/// This is the only boundary to the outside world. Every manager in this
/// crate holds an `Arc<dyn ControlPlane>` and issues one call per step; the
/// implementation is expected to be safe to share across independent
/// resources. Lookups of missing resources must fail with
/// [`HypervisorError::ResourceNotFound`] (or `VolumeNotFound`) so callers can
/// tell absence apart from backend failures, which are reported as
/// [`HypervisorError::ControlPlane`].
///
/// [`HypervisorError::ResourceNotFound`]: crate::HypervisorError::ResourceNotFound
/// [`HypervisorError::ControlPlane`]: crate::HypervisorError::ControlPlane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Connection
    // =========================================================================

    /// URI of the connection.
    async fn uri(&self) -> Result<String>;

    /// Check if the connection is healthy.
    async fn health_check(&self) -> Result<bool>;

    // =========================================================================
    // Pools and networks
    // =========================================================================

    /// Names of active resources of this kind.
    async fn list_active(&self, kind: ResourceKind) -> Result<Vec<String>>;

    /// Names of defined but inactive resources of this kind.
    async fn list_defined(&self, kind: ResourceKind) -> Result<Vec<String>>;

    /// Define a persistent resource from its XML document.
    ///
    /// Returns the name the control plane registered.
    async fn define_xml(&self, kind: ResourceKind, xml: &str) -> Result<String>;

    /// Start (create) a defined resource.
    async fn create(&self, kind: ResourceKind, name: &str) -> Result<()>;

    /// Stop (destroy) an active resource. The definition is kept.
    async fn destroy(&self, kind: ResourceKind, name: &str) -> Result<()>;

    /// Remove the definition of an inactive resource.
    async fn undefine(&self, kind: ResourceKind, name: &str) -> Result<()>;

    async fn is_active(&self, kind: ResourceKind, name: &str) -> Result<bool>;

    async fn autostart(&self, kind: ResourceKind, name: &str) -> Result<bool>;

    async fn set_autostart(&self, kind: ResourceKind, name: &str, enabled: bool) -> Result<()>;

    /// Current XML description of the resource.
    async fn xml_desc(&self, kind: ResourceKind, name: &str) -> Result<String>;

    async fn uuid(&self, kind: ResourceKind, name: &str) -> Result<String>;

    // =========================================================================
    // Storage pools
    // =========================================================================

    /// Build the underlying storage (e.g. format a volume group).
    async fn pool_build(&self, name: &str) -> Result<()>;

    /// Re-scan the pool contents.
    async fn pool_refresh(&self, name: &str) -> Result<()>;

    async fn pool_info(&self, name: &str) -> Result<PoolRuntimeInfo>;

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>>;

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn volume_create_xml(&self, pool: &str, xml: &str) -> Result<()>;

    /// Create a volume whose contents are copied from `source`.
    async fn volume_create_xml_from(&self, pool: &str, xml: &str, source: &str) -> Result<()>;

    async fn volume_xml_desc(&self, pool: &str, volume: &str) -> Result<String>;

    async fn volume_info(&self, pool: &str, volume: &str) -> Result<VolumeRuntimeInfo>;

    async fn volume_resize(&self, pool: &str, volume: &str, capacity: u64) -> Result<()>;

    async fn volume_delete(&self, pool: &str, volume: &str) -> Result<()>;

    // =========================================================================
    // Networks
    // =========================================================================

    /// Host bridge device backing the network.
    async fn network_bridge_name(&self, name: &str) -> Result<String>;

    // =========================================================================
    // Instances
    // =========================================================================

    /// Names of running instances followed by defined (stopped) ones.
    async fn list_instances(&self) -> Result<Vec<String>>;
}
