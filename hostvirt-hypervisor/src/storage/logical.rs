//! LVM storage backend.
//!
//! The pool is a volume group named after the pool, built on a single block
//! device. Building the pool formats the device, so it only ever happens once
//! between define and the first start.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::xml::{empty_element, require, target_path, text_element, PoolDocument};
use super::traits::{missing, pool_document, StorageBackend};
use super::types::PoolKind;

/// Volume group metadata format.
pub const LVM_FORMAT: &str = "lvm2";

/// Logical (LVM) pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalBackend {
    /// Block device the volume group is created on
    pub source_device: String,
}

impl LogicalBackend {
    pub fn new(source_device: impl Into<String>) -> Self {
        Self { source_device: source_device.into() }
    }

    /// Device node directory of the volume group.
    pub fn target_path(name: &str) -> String {
        format!("/dev/{}", name)
    }

    pub(crate) fn from_document(doc: &PoolDocument) -> Result<Self> {
        let source = doc.source();
        let device = source
            .device
            .first()
            .ok_or_else(|| missing("source device"))?;
        Ok(Self::new(device.path.clone()))
    }
}

impl StorageBackend for LogicalBackend {
    fn kind(&self) -> PoolKind {
        PoolKind::Logical
    }

    fn validate(&self, name: &str) -> Result<()> {
        require("pool name", name)?;
        require("source device", &self.source_device)
    }

    fn pool_xml(&self, name: &str) -> Result<String> {
        self.validate(name)?;
        let target = Self::target_path(name);

        pool_document(self.kind(), name, |w| {
            w.create_element("source").write_inner_content(|w| {
                empty_element(w, "device", &[("path", self.source_device.as_str())])?;
                text_element(w, "name", name)?;
                empty_element(w, "format", &[("type", LVM_FORMAT)])
            })?;
            target_path(w, &target)
        })
    }

    fn requires_build(&self) -> bool {
        true
    }
}
