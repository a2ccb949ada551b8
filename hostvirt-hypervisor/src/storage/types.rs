//! Storage type definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HypervisorError;
use crate::types::ResourceState;

/// Backend kind of a storage pool, as named by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Local directory (file-based)
    Directory,
    /// LVM volume group (block-based)
    Logical,
    /// Ceph RBD (block-based, distributed)
    DistributedBlock,
    /// NFS export mounted on the host (file-based, network)
    NetworkFilesystem,
}

impl PoolKind {
    /// The `type` attribute of the pool document.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Directory => "dir",
            PoolKind::Logical => "logical",
            PoolKind::DistributedBlock => "rbd",
            PoolKind::NetworkFilesystem => "netfs",
        }
    }

    /// Map a pool document `type` attribute. Pool types this crate does not
    /// provision (iscsi, disk, ...) yield `None`.
    pub fn from_type(pool_type: &str) -> Option<Self> {
        match pool_type {
            "dir" => Some(PoolKind::Directory),
            "logical" => Some(PoolKind::Logical),
            "rbd" => Some(PoolKind::DistributedBlock),
            "netfs" => Some(PoolKind::NetworkFilesystem),
            _ => None,
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a pool as reported in its info tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Inactive,
    Building,
    Running,
    Degraded,
    Inaccessible,
    Unknown,
}

impl PoolStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => PoolStatus::Inactive,
            1 => PoolStatus::Building,
            2 => PoolStatus::Running,
            3 => PoolStatus::Degraded,
            4 => PoolStatus::Inaccessible,
            _ => PoolStatus::Unknown,
        }
    }

    /// Human readable description.
    pub fn description(&self) -> &'static str {
        match self {
            PoolStatus::Inactive => "Not running",
            PoolStatus::Building => "Initializing pool, not available",
            PoolStatus::Running => "Running normally",
            PoolStatus::Degraded => "Running degraded",
            PoolStatus::Inaccessible => "Running, but not accessible",
            PoolStatus::Unknown => "Unknown",
        }
    }
}

/// Capacity figures of a pool, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// A storage pool as read back from the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub uuid: String,
    /// Backend kind, `None` for pool types this crate does not provision
    pub kind: Option<PoolKind>,
    /// Raw `type` attribute of the pool document
    pub pool_type: String,
    pub state: ResourceState,
    pub status: PoolStatus,
    pub autostart: bool,
    /// Zeroed unless the pool is active
    pub capacity: PoolCapacity,
    /// Target path (directory, volume group device, mount point)
    pub target_path: Option<String>,
}

/// Usage summary of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub size: u64,
    pub used: u64,
    pub percent: f64,
}

/// Pool overview including its volumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub name: String,
    pub active: bool,
    pub pool_type: String,
    pub autostart: bool,
    pub capacity: PoolCapacity,
    pub volumes: Vec<VolumeInfo>,
}

/// Disk image format of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFormat {
    #[default]
    Raw,
    Qcow2,
    Qcow,
    Qed,
    Vmdk,
    Vdi,
    Vpc,
    Vhdx,
    Iso,
    Dmg,
    Bochs,
    Cloop,
    Cow,
}

impl VolumeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeFormat::Raw => "raw",
            VolumeFormat::Qcow2 => "qcow2",
            VolumeFormat::Qcow => "qcow",
            VolumeFormat::Qed => "qed",
            VolumeFormat::Vmdk => "vmdk",
            VolumeFormat::Vdi => "vdi",
            VolumeFormat::Vpc => "vpc",
            VolumeFormat::Vhdx => "vhdx",
            VolumeFormat::Iso => "iso",
            VolumeFormat::Dmg => "dmg",
            VolumeFormat::Bochs => "bochs",
            VolumeFormat::Cloop => "cloop",
            VolumeFormat::Cow => "cow",
        }
    }

    /// Parse a format, falling back to raw for anything unrecognized
    /// (including the `unknown` placeholder some callers send).
    pub fn parse_lenient(s: &str) -> Self {
        match s.parse() {
            Ok(format) => format,
            Err(_) => {
                warn!(format = %s, "Unrecognized volume format, using raw");
                VolumeFormat::Raw
            }
        }
    }
}

impl FromStr for VolumeFormat {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "img" => Ok(VolumeFormat::Raw),
            "qcow2" => Ok(VolumeFormat::Qcow2),
            "qcow" => Ok(VolumeFormat::Qcow),
            "qed" => Ok(VolumeFormat::Qed),
            "vmdk" => Ok(VolumeFormat::Vmdk),
            "vdi" => Ok(VolumeFormat::Vdi),
            "vpc" | "vhd" => Ok(VolumeFormat::Vpc),
            "vhdx" => Ok(VolumeFormat::Vhdx),
            "iso" => Ok(VolumeFormat::Iso),
            "dmg" => Ok(VolumeFormat::Dmg),
            "bochs" => Ok(VolumeFormat::Bochs),
            "cloop" => Ok(VolumeFormat::Cloop),
            "cow" => Ok(VolumeFormat::Cow),
            other => Err(HypervisorError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Capacity in bytes
    pub size: u64,
    /// Format named in the volume document; block backends may report none
    pub format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_kind_type_names() {
        for kind in [
            PoolKind::Directory,
            PoolKind::Logical,
            PoolKind::DistributedBlock,
            PoolKind::NetworkFilesystem,
        ] {
            assert_eq!(PoolKind::from_type(kind.as_str()), Some(kind));
        }
        assert_eq!(PoolKind::from_type("iscsi"), None);
    }

    #[test]
    fn test_volume_format_strict_parse() {
        assert_eq!("qcow2".parse::<VolumeFormat>().unwrap(), VolumeFormat::Qcow2);
        assert_eq!("RAW".parse::<VolumeFormat>().unwrap(), VolumeFormat::Raw);
        assert_eq!("vhd".parse::<VolumeFormat>().unwrap(), VolumeFormat::Vpc);

        let err = "unknown".parse::<VolumeFormat>().unwrap_err();
        assert!(matches!(err, HypervisorError::UnsupportedFormat(ref f) if f == "unknown"));
    }

    #[test]
    fn test_volume_format_lenient_parse() {
        assert_eq!(VolumeFormat::parse_lenient("unknown"), VolumeFormat::Raw);
        assert_eq!(VolumeFormat::parse_lenient("zfs"), VolumeFormat::Raw);
        assert_eq!(VolumeFormat::parse_lenient("qcow2"), VolumeFormat::Qcow2);
    }

    #[test]
    fn test_pool_status_codes() {
        assert_eq!(PoolStatus::from_code(2), PoolStatus::Running);
        assert_eq!(PoolStatus::from_code(0).description(), "Not running");
        assert_eq!(PoolStatus::from_code(42), PoolStatus::Unknown);
    }
}
