//! Storage pools and volumes.
//!
//! This module provides one backend per pool kind:
//! - **dir**: Local directory, volumes are sparse `.img` files
//! - **logical**: LVM volume group built on a block device
//! - **rbd**: Ceph RBD pool reached through up to three monitors
//! - **netfs**: NFS (or other network filesystem) export mounted locally
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     StorageManager                              │
//! │  - Picks the backend from the PoolSpec variant                  │
//! │  - define → (build) → start → autostart                         │
//! └─────────────────────────┬───────────────────────────────────────┘
//!                           │
//!       ┌──────────────┬────┴─────────┬──────────────┐
//!       ▼              ▼              ▼              ▼
//! ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐
//! │    Dir    │  │  Logical  │  │    RBD    │  │   NetFS   │
//! │  Backend  │  │  Backend  │  │  Backend  │  │  Backend  │
//! └───────────┘  └───────────┘  └───────────┘  └───────────┘
//! ```

mod dir;
mod logical;
mod netfs;
mod rbd;
mod traits;
mod types;
mod volume;

pub use dir::*;
pub use logical::*;
pub use netfs::*;
pub use rbd::*;
pub use traits::*;
pub use types::*;
pub use volume::*;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::lifecycle::LifecycleController;
use crate::traits::ControlPlane;
use crate::types::{RefreshOutcome, ResourceKind, ResourceState};
use crate::xml::PoolDocument;

const KIND: ResourceKind = ResourceKind::StoragePool;

/// Provisions and inspects storage pools.
pub struct StorageManager {
    control: Arc<dyn ControlPlane>,
    lifecycle: LifecycleController,
    volumes: VolumeManager,
}

impl StorageManager {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            lifecycle: LifecycleController::new(control.clone()),
            volumes: VolumeManager::new(control.clone()),
            control,
        }
    }

    /// Volumes of the pools managed here.
    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Define, build if needed, start and autostart a pool.
    ///
    /// An invalid spec fails before anything reaches the control plane. A
    /// failure after the pool was defined leaves it where it got to; the
    /// last completed step is logged and the error returned unchanged.
    #[instrument(skip(self, spec), fields(pool = %name, kind = %spec.kind()))]
    pub async fn provision(&self, name: &str, spec: PoolSpec) -> Result<StoragePool> {
        let backend = spec.backend();
        let xml = backend.pool_xml(name)?;

        info!("Provisioning storage pool");
        self.lifecycle.define(KIND, name, &xml).await?;

        let mut completed = "define";
        if let Err(e) = self.bring_up(name, backend.requires_build(), &mut completed).await {
            warn!(last_step = completed, error = %e, "Storage pool left partially provisioned");
            return Err(e);
        }

        info!("Storage pool provisioned");
        self.describe(name).await
    }

    async fn bring_up(&self, name: &str, build: bool, completed: &mut &'static str) -> Result<()> {
        if build {
            self.lifecycle.build(name).await?;
            *completed = "build";
        }
        self.lifecycle.start(KIND, name).await?;
        *completed = "start";
        self.lifecycle.set_autostart(KIND, name, true).await?;
        *completed = "autostart";
        Ok(())
    }

    /// Read a pool back from the control plane.
    pub async fn describe(&self, name: &str) -> Result<StoragePool> {
        let state = self.lifecycle.state(KIND, name).await?;
        if state == ResourceState::Undefined {
            return Err(HypervisorError::not_found(KIND, name));
        }

        let xml = self.control.xml_desc(KIND, name).await?;
        let doc = PoolDocument::parse(&xml)?;
        let info = self.control.pool_info(name).await?;

        let capacity = if state == ResourceState::Active {
            PoolCapacity {
                total: info.capacity,
                used: info.allocation,
                free: info.available,
            }
        } else {
            PoolCapacity::default()
        };

        Ok(StoragePool {
            name: name.to_string(),
            uuid: self.control.uuid(KIND, name).await?,
            kind: PoolKind::from_type(&doc.pool_type),
            target_path: doc.target_path().map(str::to_string),
            pool_type: doc.pool_type,
            state,
            status: PoolStatus::from_code(info.state),
            autostart: self.control.autostart(KIND, name).await?,
            capacity,
        })
    }

    /// Provisioning parameters of an existing pool.
    pub async fn spec(&self, name: &str) -> Result<PoolSpec> {
        let xml = self.control.xml_desc(KIND, name).await?;
        Ok(PoolSpec::from_xml(&xml)?.1)
    }

    /// Names of running pools followed by stopped ones.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = self.control.list_active(KIND).await?;
        names.extend(self.control.list_defined(KIND).await?);
        Ok(names)
    }

    /// Overview of every pool, with the volumes of running ones.
    pub async fn list_info(&self) -> Result<Vec<PoolSummary>> {
        let mut summaries = Vec::new();

        for name in self.list().await? {
            let pool = self.describe(&name).await?;
            let mut volumes = Vec::new();
            for volume in self.volumes.list(&name).await? {
                volumes.push(self.volumes.describe(&name, &volume).await?);
            }

            summaries.push(PoolSummary {
                name,
                active: pool.state == ResourceState::Active,
                pool_type: pool.pool_type,
                autostart: pool.autostart,
                capacity: pool.capacity,
                volumes,
            });
        }

        Ok(summaries)
    }

    /// Size, used bytes and fill percentage, zero for stopped pools.
    pub async fn usage(&self, name: &str) -> Result<PoolUsage> {
        if self.lifecycle.refresh(name).await? == RefreshOutcome::Skipped {
            return Ok(PoolUsage::default());
        }

        let info = self.control.pool_info(name).await?;
        let used = info.capacity.saturating_sub(info.available);
        let percent = if info.capacity == 0 {
            0.0
        } else {
            used as f64 * 100.0 / info.capacity as f64
        };

        Ok(PoolUsage {
            size: info.capacity,
            used,
            percent,
        })
    }

    /// Refresh every running pool.
    pub async fn refresh_all(&self) -> Result<Vec<(String, RefreshOutcome)>> {
        let mut outcomes = Vec::new();
        for name in self.control.list_active(KIND).await? {
            let outcome = self.lifecycle.refresh(&name).await?;
            outcomes.push((name, outcome));
        }
        Ok(outcomes)
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

    pub async fn refresh(&self, name: &str) -> Result<RefreshOutcome> {
        self.lifecycle.refresh(name).await
    }

    pub async fn set_autostart(&self, name: &str, enabled: bool) -> Result<()> {
        self.lifecycle.set_autostart(KIND, name, enabled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockControlPlane, MockFault, DEFAULT_POOL_CAPACITY};

    fn setup() -> (Arc<MockControlPlane>, StorageManager) {
        let mock = Arc::new(MockControlPlane::new());
        (mock.clone(), StorageManager::new(mock))
    }

    #[tokio::test]
    async fn test_provision_dir_pool() {
        let (_, storage) = setup();

        let pool = storage
            .provision("images", DirectoryBackend::new("/var/lib/libvirt/images").into())
            .await
            .unwrap();

        assert_eq!(pool.kind, Some(PoolKind::Directory));
        assert_eq!(pool.state, ResourceState::Active);
        assert_eq!(pool.status, PoolStatus::Running);
        assert!(pool.autostart);
        assert_eq!(pool.capacity.total, DEFAULT_POOL_CAPACITY);
        assert_eq!(pool.target_path.as_deref(), Some("/var/lib/libvirt/images"));
        assert!(!pool.uuid.is_empty());
    }

    #[tokio::test]
    async fn test_provision_logical_pool_builds() {
        let (mock, storage) = setup();

        let pool = storage
            .provision("vg0", LogicalBackend::new("/dev/sdb").into())
            .await
            .unwrap();

        assert!(mock.is_built("vg0"));
        assert_eq!(pool.target_path.as_deref(), Some("/dev/vg0"));
    }

    #[tokio::test]
    async fn test_invalid_spec_touches_nothing() {
        let (_, storage) = setup();

        let err = storage
            .provision("ceph", RbdBackend::new("rbd", "admin", "bad").into())
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidSpec(_)));
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_provisioning_is_left_in_place() {
        let (mock, storage) = setup();
        mock.fail_next(MockFault::Create);

        let err = storage
            .provision("images", DirectoryBackend::new("/srv").into())
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::ControlPlane(_)));

        let pool = storage.describe("images").await.unwrap();
        assert_eq!(pool.state, ResourceState::Inactive);
        assert!(!pool.autostart);
        assert_eq!(pool.capacity, PoolCapacity::default());
    }

    #[tokio::test]
    async fn test_failed_autostart_leaves_pool_running() {
        let (mock, storage) = setup();
        mock.fail_next(MockFault::SetAutostart);

        assert!(storage
            .provision("images", DirectoryBackend::new("/srv").into())
            .await
            .is_err());

        let pool = storage.describe("images").await.unwrap();
        assert_eq!(pool.state, ResourceState::Active);
        assert!(!pool.autostart);
    }

    #[tokio::test]
    async fn test_usage() {
        let mock = Arc::new(MockControlPlane::new().with_pool_capacity(1000));
        let storage = StorageManager::new(mock.clone());
        let spec: PoolSpec = RbdBackend::new("rbd", "admin", "0f3a9c1e-5b7d-4e2f-8a6c-9d1b3e5f7a2c")
            .with_host("mon")
            .into();
        storage.provision("p", spec).await.unwrap();
        storage.volumes().create("p", "v", 250, VolumeFormat::Raw).await.unwrap();

        let usage = storage.usage("p").await.unwrap();
        assert_eq!(usage.size, 1000);
        assert_eq!(usage.used, 250);
        assert!((usage.percent - 25.0).abs() < f64::EPSILON);

        storage.stop("p").await.unwrap();
        assert_eq!(storage.usage("p").await.unwrap(), PoolUsage::default());
    }

    #[tokio::test]
    async fn test_list_info() {
        let (_, storage) = setup();
        storage.provision("a", DirectoryBackend::new("/a").into()).await.unwrap();
        storage.provision("b", DirectoryBackend::new("/b").into()).await.unwrap();
        storage.volumes().create("a", "disk", 10, VolumeFormat::Qcow2).await.unwrap();
        storage.stop("b").await.unwrap();

        let info = storage.list_info().await.unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "a");
        assert!(info[0].active);
        assert_eq!(info[0].volumes[0].name, "disk.img");
        assert_eq!(info[1].name, "b");
        assert!(!info[1].active);
        assert!(info[1].volumes.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_only_touches_active_pools() {
        let (mock, storage) = setup();
        storage.provision("a", DirectoryBackend::new("/a").into()).await.unwrap();
        storage.provision("b", DirectoryBackend::new("/b").into()).await.unwrap();
        storage.stop("b").await.unwrap();

        let outcomes = storage.refresh_all().await.unwrap();
        assert_eq!(outcomes, vec![("a".to_string(), RefreshOutcome::Refreshed)]);
        assert_eq!(mock.refresh_count("b"), 0);
    }

    #[tokio::test]
    async fn test_spec_read_back() {
        let (_, storage) = setup();
        let spec: PoolSpec = NetfsBackend::new("nas", "/export", "/mnt/nas").into();
        storage.provision("nas", spec.clone()).await.unwrap();

        assert_eq!(storage.spec("nas").await.unwrap(), spec);
    }
}
