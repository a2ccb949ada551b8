//! Control plane session setup.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use hostvirt_hypervisor::{ControlPlane, MockControlPlane};

use crate::config::{SessionBackend, SessionConfig};

/// Open the one session every command of this process goes through.
pub async fn open(config: &SessionConfig) -> Result<Arc<dyn ControlPlane>> {
    let control: Arc<dyn ControlPlane> = match config.backend {
        SessionBackend::Mock => {
            info!("Using mock control plane session");
            Arc::new(MockControlPlane::new())
        }
        SessionBackend::Libvirt => {
            #[cfg(feature = "libvirt")]
            {
                use anyhow::Context;

                let session = hostvirt_hypervisor::LibvirtSession::connect(&config.uri)
                    .await
                    .with_context(|| format!("Failed to open session to {}", config.uri))?;
                Arc::new(session)
            }
            #[cfg(not(feature = "libvirt"))]
            {
                anyhow::bail!(
                    "libvirt session requested for {} but hostvirt was built without the \
                     `libvirt` feature (use --dev for the mock session)",
                    config.uri
                );
            }
        }
    };

    Ok(control)
}
