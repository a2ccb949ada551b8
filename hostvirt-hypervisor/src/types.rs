//! Types shared by the storage and network halves of the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Family of a lifecycle-managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Storage pool
    StoragePool,
    /// Virtual network
    Network,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::StoragePool => "storage pool",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a pool or network.
///
/// ```text
/// Undefined ──define──▶ Defined ──start──▶ Active ──stop──▶ Inactive
///     ▲                    │                  ▲               │  │
///     └──────delete────────┘                  └─────start─────┘  │
///     └─────────────────────────delete───────────────────────────┘
/// ```
///
/// The control plane does not remember whether a defined resource was ever
/// started, so an observed resource that is defined but not running is
/// reported as `Inactive`. `Defined` is what [`define`] hands back.
///
/// [`define`]: crate::lifecycle::LifecycleController::define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Undefined,
    Defined,
    Active,
    Inactive,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Undefined => "undefined",
            ResourceState::Defined => "defined",
            ResourceState::Active => "active",
            ResourceState::Inactive => "inactive",
        }
    }

    /// Defined or stopped: everything that may be started, built or deleted.
    pub fn is_startable(&self) -> bool {
        matches!(self, ResourceState::Defined | ResourceState::Inactive)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a best-effort pool refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The control plane re-read the pool contents.
    Refreshed,
    /// Nothing to do, the pool is not active.
    Skipped,
    /// The refresh failed; read-only callers carry on with stale data.
    Failed(String),
}

impl RefreshOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RefreshOutcome::Failed(_))
    }
}
