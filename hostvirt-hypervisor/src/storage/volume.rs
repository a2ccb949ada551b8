//! Volumes inside a running storage pool.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::lifecycle::LifecycleController;
use crate::traits::ControlPlane;
use crate::types::{ResourceKind, ResourceState};
use crate::xml::{volume_xml, PoolDocument, VolumeDocument};
use super::types::{PoolKind, VolumeFormat, VolumeInfo};

/// Suffix directory pools give volume files.
pub const DIR_VOLUME_SUFFIX: &str = ".img";

/// Name a volume gets in a pool of the given kind.
///
/// Directory pools store volumes as `<name>.img` files; every other kind
/// uses the name as given.
pub fn volume_name(kind: Option<PoolKind>, name: &str) -> String {
    match kind {
        Some(PoolKind::Directory) => format!("{}{}", name, DIR_VOLUME_SUFFIX),
        _ => name.to_string(),
    }
}

/// Manages volumes in storage pools.
pub struct VolumeManager {
    control: Arc<dyn ControlPlane>,
    lifecycle: LifecycleController,
}

impl VolumeManager {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            lifecycle: LifecycleController::new(control.clone()),
            control,
        }
    }

    /// Kind of a pool that must be running for `operation`.
    async fn active_pool_kind(&self, pool: &str, operation: &'static str) -> Result<Option<PoolKind>> {
        match self.lifecycle.state(ResourceKind::StoragePool, pool).await? {
            ResourceState::Active => {}
            ResourceState::Undefined => {
                return Err(HypervisorError::not_found(ResourceKind::StoragePool, pool))
            }
            state => {
                return Err(HypervisorError::IllegalStateTransition {
                    kind: ResourceKind::StoragePool,
                    name: pool.to_string(),
                    state,
                    operation,
                })
            }
        }

        let xml = self.control.xml_desc(ResourceKind::StoragePool, pool).await?;
        Ok(PoolKind::from_type(&PoolDocument::parse(&xml)?.pool_type))
    }

    /// Create an empty volume.
    ///
    /// Directory pools get a sparse `<name>.img` file; on block backends the
    /// whole size is allocated up front.
    #[instrument(skip(self), fields(pool = %pool, volume = %name, size_bytes = size, format = %format))]
    pub async fn create(&self, pool: &str, name: &str, size: u64, format: VolumeFormat) -> Result<VolumeInfo> {
        let kind = self.active_pool_kind(pool, "create a volume in").await?;

        let name = volume_name(kind, name);
        let allocation = match kind {
            Some(PoolKind::Directory) => 0,
            _ => size,
        };
        let xml = volume_xml(&name, size, allocation, format)?;
        debug!(xml = %xml, "Generated volume XML");

        self.control.volume_create_xml(pool, &xml).await?;
        info!(volume = %name, "Volume created");

        self.describe(pool, &name).await
    }

    /// Copy `source` into a new volume.
    ///
    /// Without an explicit format the clone keeps the source's format (raw
    /// when the source has none, as on LVM).
    #[instrument(skip(self), fields(pool = %pool, source = %source, dest = %dest))]
    pub async fn clone(
        &self,
        pool: &str,
        source: &str,
        dest: &str,
        format: Option<VolumeFormat>,
    ) -> Result<VolumeInfo> {
        let kind = self.active_pool_kind(pool, "clone a volume in").await?;

        let format = match format {
            Some(format) => format,
            None => {
                let source_xml = self.control.volume_xml_desc(pool, source).await?;
                VolumeDocument::parse(&source_xml)?
                    .format()
                    .map(VolumeFormat::parse_lenient)
                    .unwrap_or_default()
            }
        };

        let dest = volume_name(kind, dest);
        let xml = volume_xml(&dest, 0, 0, format)?;
        debug!(xml = %xml, "Generated clone XML");

        self.control.volume_create_xml_from(pool, &xml, source).await?;
        info!(volume = %dest, format = %format, "Volume cloned");

        self.describe(pool, &dest).await
    }

    /// Grow a volume to `size` bytes.
    #[instrument(skip(self), fields(pool = %pool, volume = %name, size_bytes = size))]
    pub async fn resize(&self, pool: &str, name: &str, size: u64) -> Result<()> {
        self.active_pool_kind(pool, "resize a volume in").await?;
        self.control.volume_resize(pool, name, size).await?;
        info!("Volume resized");
        Ok(())
    }

    #[instrument(skip(self), fields(pool = %pool, volume = %name))]
    pub async fn delete(&self, pool: &str, name: &str) -> Result<()> {
        self.active_pool_kind(pool, "delete a volume in").await?;
        self.control.volume_delete(pool, name).await?;
        info!("Volume deleted");
        Ok(())
    }

    /// Name, capacity and format of a volume.
    pub async fn describe(&self, pool: &str, name: &str) -> Result<VolumeInfo> {
        let info = self.control.volume_info(pool, name).await?;
        let xml = self.control.volume_xml_desc(pool, name).await?;
        let doc = VolumeDocument::parse(&xml)?;

        Ok(VolumeInfo {
            name: name.to_string(),
            size: info.capacity,
            format: doc.format().map(str::to_string),
        })
    }

    /// Volume names of a pool, empty unless the pool is running.
    pub async fn list(&self, pool: &str) -> Result<Vec<String>> {
        match self.lifecycle.state(ResourceKind::StoragePool, pool).await? {
            ResourceState::Undefined => {
                Err(HypervisorError::not_found(ResourceKind::StoragePool, pool))
            }
            ResourceState::Active => self.control.list_volumes(pool).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Describe every volume of a pool.
    ///
    /// The pool is refreshed first so files created behind the control
    /// plane's back show up; a failed refresh only means stale data.
    #[instrument(skip(self), fields(pool = %pool))]
    pub async fn list_all(&self, pool: &str) -> Result<Vec<VolumeInfo>> {
        self.lifecycle.refresh(pool).await?;

        let mut volumes = Vec::new();
        for name in self.list(pool).await? {
            volumes.push(self.describe(pool, &name).await?);
        }
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockControlPlane, MockFault};
    use crate::storage::{
        DirectoryBackend, LogicalBackend, PoolSpec, RbdBackend, StorageBackend, StorageManager,
    };

    const SECRET: &str = "0f3a9c1e-5b7d-4e2f-8a6c-9d1b3e5f7a2c";

    async fn setup(spec: PoolSpec) -> (Arc<MockControlPlane>, VolumeManager) {
        let mock = Arc::new(MockControlPlane::new());
        StorageManager::new(mock.clone()).provision("pool", spec).await.unwrap();
        (mock.clone(), VolumeManager::new(mock))
    }

    #[test]
    fn test_volume_name_convention() {
        assert_eq!(volume_name(Some(PoolKind::Directory), "data"), "data.img");
        assert_eq!(volume_name(Some(PoolKind::Logical), "data"), "data");
        assert_eq!(volume_name(None, "data"), "data");
    }

    #[tokio::test]
    async fn test_create_in_dir_pool_is_sparse() {
        let (mock, volumes) = setup(DirectoryBackend::new("/srv/images").into()).await;

        let info = volumes.create("pool", "data", 1024, VolumeFormat::Qcow2).await.unwrap();
        assert_eq!(info.name, "data.img");
        assert_eq!(info.size, 1024);
        assert_eq!(info.format.as_deref(), Some("qcow2"));

        let raw = mock.volume_info("pool", "data.img").await.unwrap();
        assert_eq!(raw.allocation, 0);
    }

    #[tokio::test]
    async fn test_create_in_rbd_pool_is_preallocated() {
        let rbd = RbdBackend::new("rbd", "libvirt", SECRET).with_host("mon1");
        let (mock, volumes) = setup(rbd.into()).await;

        let info = volumes.create("pool", "data", 1024, VolumeFormat::Raw).await.unwrap();
        assert_eq!(info.name, "data");

        let raw = mock.volume_info("pool", "data").await.unwrap();
        assert_eq!(raw.allocation, 1024);
        assert_eq!(raw.capacity, 1024);
    }

    #[tokio::test]
    async fn test_clone_inherits_format() {
        let (_, volumes) = setup(DirectoryBackend::new("/srv/images").into()).await;
        volumes.create("pool", "base", 4096, VolumeFormat::Qcow2).await.unwrap();

        let clone = volumes.clone("pool", "base.img", "copy", None).await.unwrap();
        assert_eq!(clone.name, "copy.img");
        assert_eq!(clone.format.as_deref(), Some("qcow2"));
        assert_eq!(clone.size, 4096);

        let raw = volumes
            .clone("pool", "base.img", "flat", Some(VolumeFormat::Raw))
            .await
            .unwrap();
        assert_eq!(raw.format.as_deref(), Some("raw"));
    }

    #[tokio::test]
    async fn test_clone_without_source_format_is_raw() {
        let (_, volumes) = setup(LogicalBackend::new("/dev/sdb").into()).await;
        volumes.create("pool", "lv0", 2048, VolumeFormat::Raw).await.unwrap();

        let clone = volumes.clone("pool", "lv0", "lv1", None).await.unwrap();
        assert_eq!(clone.name, "lv1");
        assert_eq!(clone.size, 2048);
    }

    #[tokio::test]
    async fn test_missing_volume() {
        let (_, volumes) = setup(DirectoryBackend::new("/srv/images").into()).await;

        let err = volumes.resize("pool", "ghost.img", 10).await.unwrap_err();
        assert!(matches!(err, HypervisorError::VolumeNotFound { .. }));

        let err = volumes.delete("pool", "ghost.img").await.unwrap_err();
        assert!(matches!(err, HypervisorError::VolumeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_operations_need_active_pool() {
        let mock = Arc::new(MockControlPlane::new());
        let volumes = VolumeManager::new(mock.clone());
        let xml = DirectoryBackend::new("/srv").pool_xml("idle").unwrap();
        LifecycleController::new(mock.clone())
            .define(ResourceKind::StoragePool, "idle", &xml)
            .await
            .unwrap();

        let err = volumes.create("idle", "v", 1, VolumeFormat::Raw).await.unwrap_err();
        assert!(matches!(err, HypervisorError::IllegalStateTransition { .. }));

        assert!(volumes.list_all("idle").await.unwrap().is_empty());

        let err = volumes.create("ghost", "v", 1, VolumeFormat::Raw).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_all_refreshes_and_tolerates_failure() {
        let (mock, volumes) = setup(DirectoryBackend::new("/srv/images").into()).await;
        volumes.create("pool", "a", 1, VolumeFormat::Raw).await.unwrap();
        volumes.create("pool", "b", 2, VolumeFormat::Qcow2).await.unwrap();

        let before = mock.refresh_count("pool");
        let listed = volumes.list_all("pool").await.unwrap();
        assert_eq!(mock.refresh_count("pool"), before + 1);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a.img");
        assert_eq!(listed[1].size, 2);

        mock.fail_next(MockFault::Refresh);
        assert_eq!(volumes.list_all("pool").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resize_and_delete() {
        let (_, volumes) = setup(DirectoryBackend::new("/srv/images").into()).await;
        volumes.create("pool", "v", 100, VolumeFormat::Raw).await.unwrap();

        volumes.resize("pool", "v.img", 500).await.unwrap();
        assert_eq!(volumes.describe("pool", "v.img").await.unwrap().size, 500);

        volumes.delete("pool", "v.img").await.unwrap();
        assert!(volumes.list("pool").await.unwrap().is_empty());
    }
}
