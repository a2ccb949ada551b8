//! # hostvirt Hypervisor
//!
//! Resource management layer between a host-management application and the
//! hypervisor's native control API.
//!
//! This crate models storage pools, volumes and virtual networks as uniform
//! domain objects, whatever backend realizes them:
//! - **Storage**: directory, LVM, Ceph RBD and network filesystem pools
//! - **Networks**: isolated, NAT, routed and bridged networks with optional
//!   DHCP and static reservations
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐     ┌───────────────────┐
//! │  StorageManager   │     │  NetworkManager   │
//! │  VolumeManager    │     │  (topology, DHCP) │
//! └─────────┬─────────┘     └─────────┬─────────┘
//!           │   XML documents         │
//!           └────────────┬────────────┘
//!                        ▼
//!           ┌─────────────────────────┐
//!           │   LifecycleController   │
//!           └────────────┬────────────┘
//!                        ▼
//!           ┌─────────────────────────┐
//!           │   ControlPlane trait    │
//!           └────────────┬────────────┘
//!              ┌─────────┴──────────┐
//!              ▼                    ▼
//!     ┌────────────────┐  ┌──────────────────┐
//!     │ LibvirtSession │  │ MockControlPlane │
//!     └────────────────┘  └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hostvirt_hypervisor::{DirectoryBackend, MockControlPlane, StorageManager, VolumeFormat};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = Arc::new(MockControlPlane::new());
//!     let storage = StorageManager::new(session);
//!
//!     let pool = storage
//!         .provision("images", DirectoryBackend::new("/var/lib/libvirt/images").into())
//!         .await
//!         .unwrap();
//!     storage.volumes().create(&pool.name, "disk0", 10 << 30, VolumeFormat::Qcow2).await.unwrap();
//! }
//! ```

pub mod error;
pub mod traits;
pub mod types;
pub mod lifecycle;
pub mod mock;
pub mod libvirt;
pub mod storage;
pub mod network;
pub mod xml;

pub use error::{HypervisorError, Result};
pub use traits::{ControlPlane, PoolRuntimeInfo, VolumeRuntimeInfo};
pub use types::*;
pub use lifecycle::LifecycleController;
pub use mock::{MockControlPlane, MockFault};
pub use storage::{
    DirectoryBackend,
    LogicalBackend,
    NetfsBackend,
    PoolCapacity,
    PoolKind,
    PoolSpec,
    PoolStatus,
    PoolSummary,
    PoolUsage,
    RbdBackend,
    StorageBackend,
    StorageManager,
    StoragePool,
    VolumeFormat,
    VolumeInfo,
    VolumeManager,
};
pub use network::{
    DhcpRange,
    FixedReservation,
    ForwardInfo,
    ForwardMode,
    NetworkManager,
    NetworkSpec,
    NetworkSummary,
    Subnet,
    VirtualNetwork,
};

// Re-export the libvirt session when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtSession;
