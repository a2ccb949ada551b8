//! Error types for the resource management layer.

use thiserror::Error;

use crate::types::{ResourceKind, ResourceState};

/// Errors that can occur while managing pools, volumes and networks.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// Failed to connect to the control plane.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// Malformed or incomplete resource specification.
    #[error("Invalid specification: {0}")]
    InvalidSpec(String),

    /// The resource is in a state that does not allow the operation.
    #[error("Cannot {operation} {kind} '{name}' while it is {state}")]
    IllegalStateTransition {
        kind: ResourceKind,
        name: String,
        state: ResourceState,
        operation: &'static str,
    },

    /// Named pool or network does not exist.
    #[error("{kind} not found: {name}")]
    ResourceNotFound {
        kind: ResourceKind,
        name: String,
    },

    /// Named volume does not exist in the pool.
    #[error("Volume '{volume}' not found in pool '{pool}'")]
    VolumeNotFound {
        pool: String,
        volume: String,
    },

    /// Unrecognized volume format.
    #[error("Unsupported volume format: {0}")]
    UnsupportedFormat(String),

    /// Failure reported by the control plane (backend rejection, lost connection).
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// XML generation/parsing error.
    #[error("XML error: {0}")]
    XmlError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HypervisorError {
    /// Shorthand for a missing pool or network.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::ResourceNotFound { kind, name: name.into() }
    }

    /// True when the error says the named resource (or volume) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. } | Self::VolumeNotFound { .. })
    }
}

impl From<quick_xml::Error> for HypervisorError {
    fn from(e: quick_xml::Error) -> Self {
        Self::XmlError(e.to_string())
    }
}

impl From<quick_xml::DeError> for HypervisorError {
    fn from(e: quick_xml::DeError) -> Self {
        Self::XmlError(e.to_string())
    }
}

/// Result type alias for resource management operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
