//! Libvirt session implementation.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::ErrorNumber;
use virt::network::Network;
use virt::storage_pool::StoragePool;
use virt::storage_vol::StorageVol;

use crate::error::{HypervisorError, Result};
use crate::traits::{ControlPlane, PoolRuntimeInfo, VolumeRuntimeInfo};
use crate::types::ResourceKind;

fn control_plane(e: virt::error::Error) -> HypervisorError {
    HypervisorError::ControlPlane(e.to_string())
}

/// Classify a failed lookup. Only `missing` means the object does not
/// exist; a lost connection or denied access stays a control plane error.
fn lookup_error(
    code: ErrorNumber,
    missing: ErrorNumber,
    message: String,
    not_found: HypervisorError,
) -> HypervisorError {
    if code == missing {
        not_found
    } else {
        HypervisorError::ControlPlane(message)
    }
}

/// Session with a libvirt daemon.
///
/// One session serves every manager of the process. The connection stays
/// open until [`close`](Self::close) is called or the session is dropped.
pub struct LibvirtSession {
    uri: String,
    connection: Connect,
}

impl LibvirtSession {
    /// Connect to the libvirt daemon at `uri`.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub async fn connect(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri))
            .map_err(|e| HypervisorError::ConnectionFailed(e.to_string()))?;

        info!("Connected to libvirt");

        Ok(Self {
            uri: uri.to_string(),
            connection,
        })
    }

    /// Close the connection.
    pub fn close(mut self) -> Result<()> {
        self.connection.close().map_err(control_plane)?;
        info!(uri = %self.uri, "Libvirt connection closed");
        Ok(())
    }

    fn pool(&self, name: &str) -> Result<StoragePool> {
        StoragePool::lookup_by_name(&self.connection, name).map_err(|e| {
            debug!(pool = %name, error = %e, "Storage pool lookup failed");
            lookup_error(
                e.code(),
                ErrorNumber::NoStoragePool,
                e.to_string(),
                HypervisorError::not_found(ResourceKind::StoragePool, name),
            )
        })
    }

    fn network(&self, name: &str) -> Result<Network> {
        Network::lookup_by_name(&self.connection, name).map_err(|e| {
            debug!(network = %name, error = %e, "Network lookup failed");
            lookup_error(
                e.code(),
                ErrorNumber::NoNetwork,
                e.to_string(),
                HypervisorError::not_found(ResourceKind::Network, name),
            )
        })
    }

    fn volume(&self, pool: &StoragePool, pool_name: &str, name: &str) -> Result<StorageVol> {
        StorageVol::lookup_by_name(pool, name).map_err(|e| {
            debug!(pool = %pool_name, volume = %name, error = %e, "Volume lookup failed");
            lookup_error(
                e.code(),
                ErrorNumber::NoStorageVolume,
                e.to_string(),
                HypervisorError::VolumeNotFound {
                    pool: pool_name.to_string(),
                    volume: name.to_string(),
                },
            )
        })
    }
}

#[async_trait]
impl ControlPlane for LibvirtSession {
    async fn uri(&self) -> Result<String> {
        self.connection.get_uri().map_err(control_plane)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool> {
        match self.connection.is_alive() {
            Ok(alive) => Ok(alive),
            Err(e) => {
                warn!(error = %e, "Libvirt liveness check failed");
                Ok(false)
            }
        }
    }

    async fn list_active(&self, kind: ResourceKind) -> Result<Vec<String>> {
        let result = match kind {
            ResourceKind::StoragePool => self.connection.list_storage_pools(),
            ResourceKind::Network => self.connection.list_networks(),
        };
        result.map_err(control_plane)
    }

    async fn list_defined(&self, kind: ResourceKind) -> Result<Vec<String>> {
        let result = match kind {
            ResourceKind::StoragePool => self.connection.list_defined_storage_pools(),
            ResourceKind::Network => self.connection.list_defined_networks(),
        };
        result.map_err(control_plane)
    }

    #[instrument(skip(self, xml), fields(kind = %kind))]
    async fn define_xml(&self, kind: ResourceKind, xml: &str) -> Result<String> {
        let result = match kind {
            ResourceKind::StoragePool => StoragePool::define_xml(&self.connection, xml, 0)
                .and_then(|pool| pool.get_name()),
            ResourceKind::Network => {
                Network::define_xml(&self.connection, xml).and_then(|net| net.get_name())
            }
        };
        result.map_err(control_plane)
    }

    async fn create(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.create(0).map(|_| ()),
            ResourceKind::Network => self.network(name)?.create().map(|_| ()),
        };
        result.map_err(control_plane)
    }

    async fn destroy(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.destroy().map(|_| ()),
            ResourceKind::Network => self.network(name)?.destroy().map(|_| ()),
        };
        result.map_err(control_plane)
    }

    async fn undefine(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.undefine().map(|_| ()),
            ResourceKind::Network => self.network(name)?.undefine().map(|_| ()),
        };
        result.map_err(control_plane)
    }

    async fn is_active(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.is_active(),
            ResourceKind::Network => self.network(name)?.is_active(),
        };
        result.map_err(control_plane)
    }

    async fn autostart(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.get_autostart(),
            ResourceKind::Network => self.network(name)?.get_autostart(),
        };
        result.map_err(control_plane)
    }

    async fn set_autostart(&self, kind: ResourceKind, name: &str, enabled: bool) -> Result<()> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.set_autostart(enabled).map(|_| ()),
            ResourceKind::Network => self.network(name)?.set_autostart(enabled).map(|_| ()),
        };
        result.map_err(control_plane)
    }

    async fn xml_desc(&self, kind: ResourceKind, name: &str) -> Result<String> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.get_xml_desc(0),
            ResourceKind::Network => self.network(name)?.get_xml_desc(0),
        };
        result.map_err(control_plane)
    }

    async fn uuid(&self, kind: ResourceKind, name: &str) -> Result<String> {
        let result = match kind {
            ResourceKind::StoragePool => self.pool(name)?.get_uuid_string(),
            ResourceKind::Network => self.network(name)?.get_uuid_string(),
        };
        result.map_err(control_plane)
    }

    #[instrument(skip(self), fields(pool = %name))]
    async fn pool_build(&self, name: &str) -> Result<()> {
        self.pool(name)?.build(0).map(|_| ()).map_err(control_plane)
    }

    async fn pool_refresh(&self, name: &str) -> Result<()> {
        self.pool(name)?.refresh(0).map(|_| ()).map_err(control_plane)
    }

    async fn pool_info(&self, name: &str) -> Result<PoolRuntimeInfo> {
        let info = self.pool(name)?.get_info().map_err(control_plane)?;
        Ok(PoolRuntimeInfo {
            state: info.state,
            capacity: info.capacity,
            allocation: info.allocation,
            available: info.available,
        })
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        self.pool(pool)?.list_volumes().map_err(control_plane)
    }

    #[instrument(skip(self, xml), fields(pool = %pool))]
    async fn volume_create_xml(&self, pool: &str, xml: &str) -> Result<()> {
        let storage = self.pool(pool)?;
        StorageVol::create_xml(&storage, xml, 0)
            .map(|_| ())
            .map_err(control_plane)
    }

    #[instrument(skip(self, xml), fields(pool = %pool, source = %source))]
    async fn volume_create_xml_from(&self, pool: &str, xml: &str, source: &str) -> Result<()> {
        let storage = self.pool(pool)?;
        let source = self.volume(&storage, pool, source)?;
        StorageVol::create_xml_from(&storage, xml, &source, 0)
            .map(|_| ())
            .map_err(control_plane)
    }

    async fn volume_xml_desc(&self, pool: &str, volume: &str) -> Result<String> {
        let storage = self.pool(pool)?;
        self.volume(&storage, pool, volume)?
            .get_xml_desc(0)
            .map_err(control_plane)
    }

    async fn volume_info(&self, pool: &str, volume: &str) -> Result<VolumeRuntimeInfo> {
        let storage = self.pool(pool)?;
        let info = self
            .volume(&storage, pool, volume)?
            .get_info()
            .map_err(control_plane)?;
        Ok(VolumeRuntimeInfo {
            kind: info.kind as u32,
            capacity: info.capacity,
            allocation: info.allocation,
        })
    }

    async fn volume_resize(&self, pool: &str, volume: &str, capacity: u64) -> Result<()> {
        let storage = self.pool(pool)?;
        self.volume(&storage, pool, volume)?
            .resize(capacity, 0)
            .map(|_| ())
            .map_err(control_plane)
    }

    async fn volume_delete(&self, pool: &str, volume: &str) -> Result<()> {
        let storage = self.pool(pool)?;
        self.volume(&storage, pool, volume)?
            .delete(0)
            .map(|_| ())
            .map_err(control_plane)
    }

    async fn network_bridge_name(&self, name: &str) -> Result<String> {
        self.network(name)?.get_bridge_name().map_err(control_plane)
    }

    async fn list_instances(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for id in self.connection.list_domains().map_err(control_plane)? {
            match Domain::lookup_by_id(&self.connection, id).and_then(|d| d.get_name()) {
                Ok(name) => names.push(name),
                // The domain may have shut down since it was listed.
                Err(e) => debug!(id, error = %e, "Skipping vanished domain"),
            }
        }

        names.extend(self.connection.list_defined_domains().map_err(control_plane)?);
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object_is_not_found() {
        let err = lookup_error(
            ErrorNumber::NoStoragePool,
            ErrorNumber::NoStoragePool,
            "no storage pool with matching name 'images'".to_string(),
            HypervisorError::not_found(ResourceKind::StoragePool, "images"),
        );
        assert!(matches!(err, HypervisorError::ResourceNotFound { .. }));

        let err = lookup_error(
            ErrorNumber::NoStorageVolume,
            ErrorNumber::NoStorageVolume,
            "no storage vol".to_string(),
            HypervisorError::VolumeNotFound {
                pool: "images".to_string(),
                volume: "disk0.img".to_string(),
            },
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_connection_failure_is_not_not_found() {
        for code in [ErrorNumber::InvalidConn, ErrorNumber::OperationDenied, ErrorNumber::AuthFailed] {
            let err = lookup_error(
                code,
                ErrorNumber::NoNetwork,
                "invalid connection pointer".to_string(),
                HypervisorError::not_found(ResourceKind::Network, "default"),
            );
            assert!(matches!(err, HypervisorError::ControlPlane(_)), "{:?}", code);
            assert!(!err.is_not_found());
        }
    }
}
