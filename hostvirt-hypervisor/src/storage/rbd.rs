//! Ceph RBD storage backend.
//!
//! The pool maps onto an existing Ceph pool reached through one to three
//! monitors. Authentication uses a cephx user whose key is stored in a
//! hypervisor secret referenced by UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HypervisorError, Result};
use crate::xml::{empty_element, require, text_element, PoolDocument};
use super::traits::{missing, pool_document, StorageBackend};
use super::types::PoolKind;

/// Port of the Ceph monitors.
pub const CEPH_MONITOR_PORT: &str = "6789";

/// Maximum number of monitors written to a pool document.
pub const MAX_MONITORS: usize = 3;

/// Ceph RBD pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbdBackend {
    /// Ceph pool name
    pub pool: String,
    /// Ceph user (without the `client.` prefix)
    pub user: String,
    /// UUID of the secret holding the user's key
    pub secret_uuid: String,
    /// Monitor hosts
    pub hosts: Vec<String>,
}

impl RbdBackend {
    pub fn new(
        pool: impl Into<String>,
        user: impl Into<String>,
        secret_uuid: impl Into<String>,
    ) -> Self {
        Self {
            pool: pool.into(),
            user: user.into(),
            secret_uuid: secret_uuid.into(),
            hosts: Vec::new(),
        }
    }

    /// Add a monitor host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    pub(crate) fn from_document(doc: &PoolDocument) -> Result<Self> {
        let source = doc.source();
        let pool = source.name.clone().ok_or_else(|| missing("source name"))?;
        let auth = source.auth.as_ref().ok_or_else(|| missing("auth element"))?;
        let secret_uuid = auth
            .secret
            .as_ref()
            .and_then(|s| s.uuid.clone())
            .ok_or_else(|| missing("secret uuid"))?;

        Ok(Self {
            pool,
            user: auth.username.clone(),
            secret_uuid,
            hosts: source.host.iter().map(|h| h.name.clone()).collect(),
        })
    }
}

impl StorageBackend for RbdBackend {
    fn kind(&self) -> PoolKind {
        PoolKind::DistributedBlock
    }

    fn validate(&self, name: &str) -> Result<()> {
        require("pool name", name)?;
        require("ceph pool", &self.pool)?;
        require("ceph user", &self.user)?;

        Uuid::parse_str(self.secret_uuid.trim()).map_err(|_| {
            HypervisorError::InvalidSpec(format!(
                "secret uuid '{}' is not a UUID",
                self.secret_uuid
            ))
        })?;

        if self.hosts.is_empty() || self.hosts.len() > MAX_MONITORS {
            return Err(HypervisorError::InvalidSpec(format!(
                "rbd pools need 1 to {} monitor hosts, got {}",
                MAX_MONITORS,
                self.hosts.len()
            )));
        }
        for host in &self.hosts {
            require("monitor host", host)?;
        }

        Ok(())
    }

    fn pool_xml(&self, name: &str) -> Result<String> {
        self.validate(name)?;

        pool_document(self.kind(), name, |w| {
            w.create_element("source").write_inner_content(|w| {
                text_element(w, "name", &self.pool)?;
                for host in &self.hosts {
                    empty_element(w, "host", &[("name", host.as_str()), ("port", CEPH_MONITOR_PORT)])?;
                }
                w.create_element("auth")
                    .with_attributes([("username", self.user.as_str()), ("type", "ceph")])
                    .write_inner_content(|w| {
                        empty_element(w, "secret", &[("uuid", self.secret_uuid.as_str())])
                    })?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok(())
        })
    }
}
