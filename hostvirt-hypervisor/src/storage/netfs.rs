//! Network filesystem storage backend.
//!
//! An export from a file server is mounted on the target directory when the
//! pool starts; volumes are files inside the mount.

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};
use crate::xml::{empty_element, require, target_path, PoolDocument};
use super::traits::{missing, pool_document, StorageBackend};
use super::types::PoolKind;

/// Filesystem types the control plane can mount for a netfs pool.
pub const NETFS_FORMATS: &[&str] = &["auto", "nfs", "glusterfs", "cifs"];

/// Network filesystem pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetfsBackend {
    /// File server
    pub host: String,
    /// Exported directory on the server
    pub export_path: String,
    /// Filesystem type (`nfs` unless told otherwise)
    pub format: String,
    /// Local mount point
    pub target: String,
}

impl NetfsBackend {
    /// NFS export mounted on `target`.
    pub fn new(
        host: impl Into<String>,
        export_path: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            export_path: export_path.into(),
            format: "nfs".to_string(),
            target: target.into(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub(crate) fn from_document(doc: &PoolDocument) -> Result<Self> {
        let source = doc.source();
        let host = source.host.first().ok_or_else(|| missing("source host"))?;
        let dir = source.dir.as_ref().ok_or_else(|| missing("source dir"))?;
        let format = source.format.as_ref().ok_or_else(|| missing("source format"))?;
        let target = doc.target_path().ok_or_else(|| missing("target path"))?;

        Ok(Self {
            host: host.name.clone(),
            export_path: dir.path.clone(),
            format: format.kind.clone(),
            target: target.to_string(),
        })
    }
}

impl StorageBackend for NetfsBackend {
    fn kind(&self) -> PoolKind {
        PoolKind::NetworkFilesystem
    }

    fn validate(&self, name: &str) -> Result<()> {
        require("pool name", name)?;
        require("server host", &self.host)?;
        require("export path", &self.export_path)?;
        require("target path", &self.target)?;

        if !NETFS_FORMATS.contains(&self.format.as_str()) {
            return Err(HypervisorError::InvalidSpec(format!(
                "unknown network filesystem format '{}'",
                self.format
            )));
        }
        Ok(())
    }

    fn pool_xml(&self, name: &str) -> Result<String> {
        self.validate(name)?;

        pool_document(self.kind(), name, |w| {
            w.create_element("source").write_inner_content(|w| {
                empty_element(w, "host", &[("name", self.host.as_str())])?;
                empty_element(w, "dir", &[("path", self.export_path.as_str())])?;
                empty_element(w, "format", &[("type", self.format.as_str())])
            })?;
            target_path(w, &self.target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netfs_pool_xml() {
        let xml = NetfsBackend::new("nas.local", "/export/vms", "/mnt/vms")
            .pool_xml("nas")
            .unwrap();

        assert!(xml.trim_start().starts_with(r#"<pool type="netfs">"#));
        assert!(xml.contains(r#"<host name="nas.local"/>"#));
        assert!(xml.contains(r#"<dir path="/export/vms"/>"#));
        assert!(xml.contains(r#"<format type="nfs"/>"#));
        assert!(xml.contains("<path>/mnt/vms</path>"));
    }

    #[test]
    fn test_netfs_pool_format() {
        let gluster = NetfsBackend::new("g1", "/vol", "/mnt/g").with_format("glusterfs");
        assert!(gluster.validate("g").is_ok());

        let bogus = NetfsBackend::new("g1", "/vol", "/mnt/g").with_format("ext4");
        assert!(matches!(bogus.validate("g"), Err(HypervisorError::InvalidSpec(_))));
    }
}
