//! In-memory control plane for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::storage::{PoolKind, VolumeFormat};
use crate::traits::{ControlPlane, PoolRuntimeInfo, VolumeRuntimeInfo};
use crate::types::ResourceKind;
use crate::xml::{empty_element, render, text_element, NetworkDocument, PoolDocument, VolumeDocument};

/// URI reported by the mock session.
pub const MOCK_URI: &str = "mock:///default";

/// Capacity every mock pool reports: 100 GiB.
pub const DEFAULT_POOL_CAPACITY: u64 = 100 * 1024 * 1024 * 1024;

/// Volume type codes of the volume info tuple.
const VOL_FILE: u32 = 0;
const VOL_BLOCK: u32 = 1;
const VOL_NETWORK: u32 = 3;

/// Control plane call that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Define,
    Build,
    Create,
    Destroy,
    Undefine,
    SetAutostart,
    Refresh,
    VolumeCreate,
    VolumeClone,
    VolumeResize,
    VolumeDelete,
    BridgeName,
}

/// Mock control plane.
///
/// Keeps pools, volumes and networks in memory and enforces the same rules
/// a real hypervisor would: names are unique, running resources cannot be
/// undefined, LVM pools must be built before they start, volumes only exist
/// in running pools, and volumes never shrink. Useful for:
/// - Unit and integration testing
/// - Trying the CLI without libvirt installed
pub struct MockControlPlane {
    pools: RwLock<HashMap<String, MockPool>>,
    networks: RwLock<HashMap<String, MockNetwork>>,
    instances: RwLock<Vec<(String, bool)>>,
    faults: RwLock<Vec<MockFault>>,
    pool_capacity: u64,
    next_bridge: AtomicUsize,
}

struct MockEntry {
    xml: String,
    uuid: String,
    active: bool,
    autostart: bool,
}

impl MockEntry {
    fn new(xml: &str) -> Self {
        Self {
            xml: xml.to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            active: false,
            autostart: false,
        }
    }
}

struct MockPool {
    entry: MockEntry,
    kind: Option<PoolKind>,
    built: bool,
    refreshes: usize,
    volumes: BTreeMap<String, MockVolume>,
}

struct MockNetwork {
    entry: MockEntry,
    bridge: String,
}

#[derive(Clone)]
struct MockVolume {
    format: Option<VolumeFormat>,
    capacity: u64,
    allocation: u64,
}

fn poisoned<T>(_: T) -> HypervisorError {
    HypervisorError::Internal("Lock poisoned".to_string())
}

fn rejected(message: String) -> HypervisorError {
    HypervisorError::ControlPlane(message)
}

impl MockControlPlane {
    /// Create an empty mock control plane.
    pub fn new() -> Self {
        info!("Creating mock control plane");
        Self {
            pools: RwLock::new(HashMap::new()),
            networks: RwLock::new(HashMap::new()),
            instances: RwLock::new(Vec::new()),
            faults: RwLock::new(Vec::new()),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            next_bridge: AtomicUsize::new(0),
        }
    }

    /// Capacity reported for every pool.
    pub fn with_pool_capacity(mut self, bytes: u64) -> Self {
        self.pool_capacity = bytes;
        self
    }

    /// Seed an instance, running or just defined.
    pub fn with_instance(mut self, name: impl Into<String>, running: bool) -> Self {
        if let Ok(instances) = self.instances.get_mut() {
            instances.push((name.into(), running));
        }
        self
    }

    /// Make the next call of the given kind fail with a control plane error.
    pub fn fail_next(&self, fault: MockFault) {
        if let Ok(mut faults) = self.faults.write() {
            faults.push(fault);
        }
    }

    /// Whether the pool's storage has been built.
    pub fn is_built(&self, pool: &str) -> bool {
        self.pools
            .read()
            .ok()
            .and_then(|pools| pools.get(pool).map(|p| p.built))
            .unwrap_or(false)
    }

    /// How many times the pool has been refreshed.
    pub fn refresh_count(&self, pool: &str) -> usize {
        self.pools
            .read()
            .ok()
            .and_then(|pools| pools.get(pool).map(|p| p.refreshes))
            .unwrap_or(0)
    }

    fn check_fault(&self, fault: MockFault) -> Result<()> {
        let mut faults = self.faults.write().map_err(poisoned)?;
        if let Some(pos) = faults.iter().position(|f| *f == fault) {
            faults.remove(pos);
            debug!(?fault, "Injecting failure");
            return Err(rejected(format!("injected failure: {:?}", fault)));
        }
        Ok(())
    }

    fn with_entry<R>(
        &self,
        kind: ResourceKind,
        name: &str,
        f: impl FnOnce(&mut MockEntry) -> Result<R>,
    ) -> Result<R> {
        match kind {
            ResourceKind::StoragePool => self.with_pool(name, |pool| f(&mut pool.entry)),
            ResourceKind::Network => {
                let mut networks = self.networks.write().map_err(poisoned)?;
                let network = networks
                    .get_mut(name)
                    .ok_or_else(|| HypervisorError::not_found(kind, name))?;
                f(&mut network.entry)
            }
        }
    }

    fn with_pool<R>(&self, name: &str, f: impl FnOnce(&mut MockPool) -> Result<R>) -> Result<R> {
        let mut pools = self.pools.write().map_err(poisoned)?;
        let pool = pools
            .get_mut(name)
            .ok_or_else(|| HypervisorError::not_found(ResourceKind::StoragePool, name))?;
        f(pool)
    }

    fn with_active_pool<R>(&self, name: &str, f: impl FnOnce(&mut MockPool) -> Result<R>) -> Result<R> {
        self.with_pool(name, |pool| {
            if !pool.entry.active {
                return Err(rejected(format!("storage pool '{}' is not active", name)));
            }
            f(pool)
        })
    }

    fn volume_format(pool: &MockPool, doc: &VolumeDocument) -> Result<Option<VolumeFormat>> {
        // LVM volumes carry no image format.
        if pool.kind == Some(PoolKind::Logical) {
            return Ok(None);
        }
        match doc.format() {
            Some(format) => format
                .parse::<VolumeFormat>()
                .map(Some)
                .map_err(|_| rejected(format!("unsupported volume format '{}'", format))),
            None => Ok(Some(VolumeFormat::Raw)),
        }
    }

    fn volume_document(name: &str, volume: &MockVolume) -> Result<String> {
        render("volume", &[], |w| {
            text_element(w, "name", name)?;
            text_element(w, "capacity", &volume.capacity.to_string())?;
            text_element(w, "allocation", &volume.allocation.to_string())?;
            if let Some(format) = volume.format {
                w.create_element("target").write_inner_content(|w| {
                    empty_element(w, "format", &[("type", format.as_str())])
                })?;
            }
            Ok(())
        })
    }

    fn names(&self, kind: ResourceKind, active: bool) -> Result<Vec<String>> {
        let mut names: Vec<String> = match kind {
            ResourceKind::StoragePool => self
                .pools
                .read()
                .map_err(poisoned)?
                .iter()
                .filter(|(_, p)| p.entry.active == active)
                .map(|(name, _)| name.clone())
                .collect(),
            ResourceKind::Network => self
                .networks
                .read()
                .map_err(poisoned)?
                .iter()
                .filter(|(_, n)| n.entry.active == active)
                .map(|(name, _)| name.clone())
                .collect(),
        };
        names.sort();
        Ok(names)
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn uri(&self) -> Result<String> {
        Ok(MOCK_URI.to_string())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn list_active(&self, kind: ResourceKind) -> Result<Vec<String>> {
        self.names(kind, true)
    }

    async fn list_defined(&self, kind: ResourceKind) -> Result<Vec<String>> {
        self.names(kind, false)
    }

    #[instrument(skip(self, xml), fields(kind = %kind))]
    async fn define_xml(&self, kind: ResourceKind, xml: &str) -> Result<String> {
        self.check_fault(MockFault::Define)?;

        match kind {
            ResourceKind::StoragePool => {
                let doc = PoolDocument::parse(xml)?;
                let mut pools = self.pools.write().map_err(poisoned)?;
                if pools.contains_key(&doc.name) {
                    return Err(rejected(format!("storage pool '{}' already exists", doc.name)));
                }
                let pool = MockPool {
                    entry: MockEntry::new(xml),
                    kind: PoolKind::from_type(&doc.pool_type),
                    built: false,
                    refreshes: 0,
                    volumes: BTreeMap::new(),
                };
                pools.insert(doc.name.clone(), pool);
                info!(name = %doc.name, "Mock storage pool defined");
                Ok(doc.name)
            }
            ResourceKind::Network => {
                let doc = NetworkDocument::parse(xml)?;
                let mut networks = self.networks.write().map_err(poisoned)?;
                if networks.contains_key(&doc.name) {
                    return Err(rejected(format!("network '{}' already exists", doc.name)));
                }
                let bridge = match doc.bridge.as_ref().and_then(|b| b.name.clone()) {
                    Some(bridge) => bridge,
                    None => format!("virbr{}", self.next_bridge.fetch_add(1, Ordering::Relaxed)),
                };
                let network = MockNetwork {
                    entry: MockEntry::new(xml),
                    bridge,
                };
                networks.insert(doc.name.clone(), network);
                info!(name = %doc.name, "Mock network defined");
                Ok(doc.name)
            }
        }
    }

    async fn create(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.check_fault(MockFault::Create)?;

        if kind == ResourceKind::StoragePool {
            return self.with_pool(name, |pool| {
                if pool.entry.active {
                    return Err(rejected(format!("storage pool '{}' is already active", name)));
                }
                if pool.kind == Some(PoolKind::Logical) && !pool.built {
                    return Err(rejected(format!("volume group '{}' has not been built", name)));
                }
                pool.entry.active = true;
                Ok(())
            });
        }

        self.with_entry(kind, name, |entry| {
            if entry.active {
                return Err(rejected(format!("{} '{}' is already active", kind, name)));
            }
            entry.active = true;
            Ok(())
        })
    }

    async fn destroy(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.check_fault(MockFault::Destroy)?;
        self.with_entry(kind, name, |entry| {
            if !entry.active {
                return Err(rejected(format!("{} '{}' is not active", kind, name)));
            }
            entry.active = false;
            Ok(())
        })
    }

    async fn undefine(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.check_fault(MockFault::Undefine)?;
        self.with_entry(kind, name, |entry| {
            if entry.active {
                return Err(rejected(format!("{} '{}' is still active", kind, name)));
            }
            Ok(())
        })?;

        match kind {
            ResourceKind::StoragePool => {
                self.pools.write().map_err(poisoned)?.remove(name);
            }
            ResourceKind::Network => {
                self.networks.write().map_err(poisoned)?.remove(name);
            }
        }
        Ok(())
    }

    async fn is_active(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        self.with_entry(kind, name, |entry| Ok(entry.active))
    }

    async fn autostart(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        self.with_entry(kind, name, |entry| Ok(entry.autostart))
    }

    async fn set_autostart(&self, kind: ResourceKind, name: &str, enabled: bool) -> Result<()> {
        self.check_fault(MockFault::SetAutostart)?;
        self.with_entry(kind, name, |entry| {
            entry.autostart = enabled;
            Ok(())
        })
    }

    async fn xml_desc(&self, kind: ResourceKind, name: &str) -> Result<String> {
        self.with_entry(kind, name, |entry| Ok(entry.xml.clone()))
    }

    async fn uuid(&self, kind: ResourceKind, name: &str) -> Result<String> {
        self.with_entry(kind, name, |entry| Ok(entry.uuid.clone()))
    }

    async fn pool_build(&self, name: &str) -> Result<()> {
        self.check_fault(MockFault::Build)?;
        self.with_pool(name, |pool| {
            if pool.entry.active {
                return Err(rejected(format!("storage pool '{}' is active", name)));
            }
            pool.built = true;
            Ok(())
        })
    }

    async fn pool_refresh(&self, name: &str) -> Result<()> {
        self.check_fault(MockFault::Refresh)?;
        self.with_active_pool(name, |pool| {
            pool.refreshes += 1;
            Ok(())
        })
    }

    async fn pool_info(&self, name: &str) -> Result<PoolRuntimeInfo> {
        let capacity = self.pool_capacity;
        self.with_pool(name, |pool| {
            if !pool.entry.active {
                return Ok(PoolRuntimeInfo::default());
            }
            let allocation: u64 = pool.volumes.values().map(|v| v.allocation).sum();
            Ok(PoolRuntimeInfo {
                state: 2,
                capacity,
                allocation,
                available: capacity.saturating_sub(allocation),
            })
        })
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        self.with_active_pool(pool, |pool| Ok(pool.volumes.keys().cloned().collect()))
    }

    #[instrument(skip(self, xml), fields(pool = %pool))]
    async fn volume_create_xml(&self, pool: &str, xml: &str) -> Result<()> {
        self.check_fault(MockFault::VolumeCreate)?;
        let doc = VolumeDocument::parse(xml)?;
        let capacity = doc.capacity_bytes()?;
        let allocation = doc.allocation_bytes()?;

        self.with_active_pool(pool, |p| {
            if p.volumes.contains_key(&doc.name) {
                return Err(rejected(format!("volume '{}' already exists", doc.name)));
            }
            let format = Self::volume_format(p, &doc)?;
            p.volumes.insert(doc.name.clone(), MockVolume { format, capacity, allocation });
            debug!(volume = %doc.name, "Mock volume created");
            Ok(())
        })
    }

    #[instrument(skip(self, xml), fields(pool = %pool, source = %source))]
    async fn volume_create_xml_from(&self, pool: &str, xml: &str, source: &str) -> Result<()> {
        self.check_fault(MockFault::VolumeClone)?;
        let doc = VolumeDocument::parse(xml)?;
        let capacity = doc.capacity_bytes()?;

        self.with_active_pool(pool, |p| {
            let src = p.volumes.get(source).cloned().ok_or_else(|| {
                HypervisorError::VolumeNotFound {
                    pool: pool.to_string(),
                    volume: source.to_string(),
                }
            })?;
            if p.volumes.contains_key(&doc.name) {
                return Err(rejected(format!("volume '{}' already exists", doc.name)));
            }
            let format = match doc.format() {
                Some(_) => Self::volume_format(p, &doc)?,
                None => src.format,
            };
            p.volumes.insert(doc.name.clone(), MockVolume {
                format,
                capacity: capacity.max(src.capacity),
                allocation: src.allocation,
            });
            debug!(volume = %doc.name, "Mock volume cloned");
            Ok(())
        })
    }

    async fn volume_xml_desc(&self, pool: &str, volume: &str) -> Result<String> {
        let vol = self.with_active_pool(pool, |p| {
            p.volumes.get(volume).cloned().ok_or_else(|| HypervisorError::VolumeNotFound {
                pool: pool.to_string(),
                volume: volume.to_string(),
            })
        })?;
        Self::volume_document(volume, &vol)
    }

    async fn volume_info(&self, pool: &str, volume: &str) -> Result<VolumeRuntimeInfo> {
        self.with_active_pool(pool, |p| {
            let vol = p.volumes.get(volume).ok_or_else(|| HypervisorError::VolumeNotFound {
                pool: pool.to_string(),
                volume: volume.to_string(),
            })?;
            let kind = match p.kind {
                Some(PoolKind::Logical) => VOL_BLOCK,
                Some(PoolKind::DistributedBlock) => VOL_NETWORK,
                _ => VOL_FILE,
            };
            Ok(VolumeRuntimeInfo {
                kind,
                capacity: vol.capacity,
                allocation: vol.allocation,
            })
        })
    }

    async fn volume_resize(&self, pool: &str, volume: &str, capacity: u64) -> Result<()> {
        self.check_fault(MockFault::VolumeResize)?;
        self.with_active_pool(pool, |p| {
            let preallocated = matches!(
                p.kind,
                Some(PoolKind::Logical) | Some(PoolKind::DistributedBlock)
            );
            let vol = p.volumes.get_mut(volume).ok_or_else(|| HypervisorError::VolumeNotFound {
                pool: pool.to_string(),
                volume: volume.to_string(),
            })?;
            if capacity < vol.capacity {
                return Err(rejected(format!(
                    "cannot shrink volume '{}' from {} to {} bytes",
                    volume, vol.capacity, capacity
                )));
            }
            vol.capacity = capacity;
            if preallocated {
                vol.allocation = capacity;
            }
            Ok(())
        })
    }

    async fn volume_delete(&self, pool: &str, volume: &str) -> Result<()> {
        self.check_fault(MockFault::VolumeDelete)?;
        self.with_active_pool(pool, |p| {
            p.volumes
                .remove(volume)
                .map(|_| ())
                .ok_or_else(|| HypervisorError::VolumeNotFound {
                    pool: pool.to_string(),
                    volume: volume.to_string(),
                })
        })
    }

    async fn network_bridge_name(&self, name: &str) -> Result<String> {
        self.check_fault(MockFault::BridgeName)?;
        let networks = self.networks.read().map_err(poisoned)?;
        networks
            .get(name)
            .map(|n| n.bridge.clone())
            .ok_or_else(|| HypervisorError::not_found(ResourceKind::Network, name))
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        let instances = self.instances.read().map_err(poisoned)?;
        let running = instances.iter().filter(|(_, running)| *running);
        let stopped = instances.iter().filter(|(_, running)| !*running);
        Ok(running.chain(stopped).map(|(name, _)| name.clone()).collect())
    }
}
