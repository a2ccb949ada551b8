//! Storage backend trait definition.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};
use crate::xml::{render, text_element, PoolDocument, XmlWriter};
use super::dir::DirectoryBackend;
use super::logical::LogicalBackend;
use super::netfs::NetfsBackend;
use super::rbd::RbdBackend;
use super::types::PoolKind;

/// Storage backend trait - implemented by each pool kind.
///
/// A backend knows how to describe a pool of its kind to the control plane.
/// The StorageManager drives the define/build/start sequence; backends only
/// contribute the document and whether a build step is needed.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Pool kind this backend provisions.
    fn kind(&self) -> PoolKind;

    /// Check that every field the pool document needs is present.
    fn validate(&self, name: &str) -> Result<()>;

    /// Build the pool document for a pool called `name`.
    ///
    /// Fails with `InvalidSpec` when [`validate`](Self::validate) does.
    fn pool_xml(&self, name: &str) -> Result<String>;

    /// Whether the underlying storage has to be built (formatted) between
    /// define and start.
    fn requires_build(&self) -> bool {
        false
    }
}

/// Write `<pool type='kind'><name>name</name>...</pool>`.
pub(crate) fn pool_document<F>(kind: PoolKind, name: &str, body: F) -> Result<String>
where
    F: FnOnce(&mut XmlWriter) -> quick_xml::Result<()>,
{
    render("pool", &[("type", kind.as_str())], |w| {
        text_element(w, "name", name)?;
        body(w)
    })
}

/// Provisioning parameters of a storage pool, one variant per backend kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolSpec {
    Directory(DirectoryBackend),
    Logical(LogicalBackend),
    DistributedBlock(RbdBackend),
    NetworkFilesystem(NetfsBackend),
}

impl PoolSpec {
    pub fn backend(&self) -> &dyn StorageBackend {
        match self {
            PoolSpec::Directory(b) => b,
            PoolSpec::Logical(b) => b,
            PoolSpec::DistributedBlock(b) => b,
            PoolSpec::NetworkFilesystem(b) => b,
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.backend().kind()
    }

    pub fn pool_xml(&self, name: &str) -> Result<String> {
        self.backend().pool_xml(name)
    }

    /// Recover the pool name and provisioning parameters from a pool document.
    pub fn from_xml(xml: &str) -> Result<(String, PoolSpec)> {
        let doc = PoolDocument::parse(xml)?;
        let kind = PoolKind::from_type(&doc.pool_type).ok_or_else(|| {
            HypervisorError::XmlError(format!("unsupported pool type '{}'", doc.pool_type))
        })?;

        let spec = match kind {
            PoolKind::Directory => PoolSpec::Directory(DirectoryBackend::from_document(&doc)?),
            PoolKind::Logical => PoolSpec::Logical(LogicalBackend::from_document(&doc)?),
            PoolKind::DistributedBlock => {
                PoolSpec::DistributedBlock(RbdBackend::from_document(&doc)?)
            }
            PoolKind::NetworkFilesystem => {
                PoolSpec::NetworkFilesystem(NetfsBackend::from_document(&doc)?)
            }
        };

        Ok((doc.name, spec))
    }
}

impl From<DirectoryBackend> for PoolSpec {
    fn from(b: DirectoryBackend) -> Self {
        PoolSpec::Directory(b)
    }
}

impl From<LogicalBackend> for PoolSpec {
    fn from(b: LogicalBackend) -> Self {
        PoolSpec::Logical(b)
    }
}

impl From<RbdBackend> for PoolSpec {
    fn from(b: RbdBackend) -> Self {
        PoolSpec::DistributedBlock(b)
    }
}

impl From<NetfsBackend> for PoolSpec {
    fn from(b: NetfsBackend) -> Self {
        PoolSpec::NetworkFilesystem(b)
    }
}

/// Missing element of a document that should have it.
pub(crate) fn missing(what: &str) -> HypervisorError {
    HypervisorError::XmlError(format!("pool document has no {}", what))
}
