//! Lifecycle of storage pools and virtual networks.
//!
//! Every transition is checked against the state observed on the control
//! plane immediately before the call; nothing is cached between calls.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::traits::ControlPlane;
use crate::types::{RefreshOutcome, ResourceKind, ResourceState};

/// Drives define / build / start / stop / delete for pools and networks.
#[derive(Clone)]
pub struct LifecycleController {
    control: Arc<dyn ControlPlane>,
}

impl LifecycleController {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    /// Observed state of the resource.
    ///
    /// A resource the control plane does not know is `Undefined`; a known one
    /// is either `Active` or `Inactive`.
    pub async fn state(&self, kind: ResourceKind, name: &str) -> Result<ResourceState> {
        match self.control.is_active(kind, name).await {
            Ok(true) => Ok(ResourceState::Active),
            Ok(false) => Ok(ResourceState::Inactive),
            Err(e) if e.is_not_found() => Ok(ResourceState::Undefined),
            Err(e) => Err(e),
        }
    }

    /// Fail unless the resource exists and `allowed` accepts its state.
    async fn expect_state(
        &self,
        kind: ResourceKind,
        name: &str,
        operation: &'static str,
        allowed: fn(&ResourceState) -> bool,
    ) -> Result<ResourceState> {
        let state = self.state(kind, name).await?;

        if state == ResourceState::Undefined {
            return Err(HypervisorError::not_found(kind, name));
        }
        if !allowed(&state) {
            return Err(HypervisorError::IllegalStateTransition {
                kind,
                name: name.to_string(),
                state,
                operation,
            });
        }
        Ok(state)
    }

    /// Register a resource from its document.
    #[instrument(skip(self, xml), fields(kind = %kind, name = %name))]
    pub async fn define(&self, kind: ResourceKind, name: &str, xml: &str) -> Result<ResourceState> {
        let state = self.state(kind, name).await?;
        if state != ResourceState::Undefined {
            return Err(HypervisorError::IllegalStateTransition {
                kind,
                name: name.to_string(),
                state,
                operation: "define",
            });
        }

        debug!(xml = %xml, "Defining resource");
        let defined = self.control.define_xml(kind, xml).await?;
        if defined != name {
            warn!(defined = %defined, "Control plane registered a different name");
        }

        info!("Resource defined");
        Ok(ResourceState::Defined)
    }

    /// Build the storage underneath a pool. The pool must not be running.
    #[instrument(skip(self), fields(pool = %pool))]
    pub async fn build(&self, pool: &str) -> Result<()> {
        self.expect_state(ResourceKind::StoragePool, pool, "build", ResourceState::is_startable)
            .await?;

        self.control.pool_build(pool).await?;
        info!("Storage pool built");
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %kind, name = %name))]
    pub async fn start(&self, kind: ResourceKind, name: &str) -> Result<ResourceState> {
        self.expect_state(kind, name, "start", ResourceState::is_startable)
            .await?;

        self.control.create(kind, name).await?;
        info!("Resource started");
        Ok(ResourceState::Active)
    }

    #[instrument(skip(self), fields(kind = %kind, name = %name))]
    pub async fn stop(&self, kind: ResourceKind, name: &str) -> Result<ResourceState> {
        self.expect_state(kind, name, "stop", |s| *s == ResourceState::Active)
            .await?;

        self.control.destroy(kind, name).await?;
        info!("Resource stopped");
        Ok(ResourceState::Inactive)
    }

    /// Remove the definition. Running resources have to be stopped first.
    #[instrument(skip(self), fields(kind = %kind, name = %name))]
    pub async fn delete(&self, kind: ResourceKind, name: &str) -> Result<ResourceState> {
        self.expect_state(kind, name, "delete", ResourceState::is_startable)
            .await?;

        self.control.undefine(kind, name).await?;
        info!("Resource deleted");
        Ok(ResourceState::Undefined)
    }

    #[instrument(skip(self), fields(kind = %kind, name = %name))]
    pub async fn set_autostart(&self, kind: ResourceKind, name: &str, enabled: bool) -> Result<()> {
        self.expect_state(kind, name, "configure autostart of", |_| true)
            .await?;

        self.control.set_autostart(kind, name, enabled).await?;
        info!(enabled, "Autostart updated");
        Ok(())
    }

    pub async fn autostart(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        self.expect_state(kind, name, "read autostart of", |_| true)
            .await?;
        self.control.autostart(kind, name).await
    }

    /// Re-scan the contents of a pool.
    ///
    /// Inactive pools are skipped. Control plane failures are logged and
    /// reported in the outcome instead of being returned as errors; only a
    /// pool that does not exist is an error.
    #[instrument(skip(self), fields(pool = %pool))]
    pub async fn refresh(&self, pool: &str) -> Result<RefreshOutcome> {
        let state = match self.state(ResourceKind::StoragePool, pool).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not read pool state, skipping refresh");
                return Ok(RefreshOutcome::Failed(e.to_string()));
            }
        };

        match state {
            ResourceState::Undefined => {
                Err(HypervisorError::not_found(ResourceKind::StoragePool, pool))
            }
            ResourceState::Active => match self.control.pool_refresh(pool).await {
                Ok(()) => {
                    debug!("Storage pool refreshed");
                    Ok(RefreshOutcome::Refreshed)
                }
                Err(e) => {
                    warn!(error = %e, "Storage pool refresh failed");
                    Ok(RefreshOutcome::Failed(e.to_string()))
                }
            },
            _ => Ok(RefreshOutcome::Skipped),
        }
    }
}
