//! Local directory storage backend.
//!
//! Volumes are plain files under the target directory. The control plane
//! creates the directory when the pool starts.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::xml::{require, target_path, PoolDocument};
use super::traits::{missing, pool_document, StorageBackend};
use super::types::PoolKind;

/// Directory pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBackend {
    /// Directory holding the volume files
    pub target: String,
}

impl DirectoryBackend {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }

    pub(crate) fn from_document(doc: &PoolDocument) -> Result<Self> {
        let target = doc.target_path().ok_or_else(|| missing("target path"))?;
        Ok(Self::new(target))
    }
}

impl StorageBackend for DirectoryBackend {
    fn kind(&self) -> PoolKind {
        PoolKind::Directory
    }

    fn validate(&self, name: &str) -> Result<()> {
        require("pool name", name)?;
        require("target path", &self.target)
    }

    fn pool_xml(&self, name: &str) -> Result<String> {
        self.validate(name)?;
        pool_document(self.kind(), name, |w| target_path(w, &self.target))
    }
}
