//! Command dispatch.
//!
//! Every command maps onto one public operation of the management layer
//! and returns its result as JSON for the caller to print.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use hostvirt_common::pretty_bytes;
use hostvirt_hypervisor::{
    ControlPlane, DirectoryBackend, LogicalBackend, NetfsBackend, NetworkManager, NetworkSpec,
    PoolSpec, RbdBackend, ResourceKind, ResourceState, StorageManager, VolumeFormat,
};

use crate::cli::{Command, NetworkCommand, PoolCommand, VolumeCommand};
use crate::config::Config;

/// Run one command against the session.
pub async fn execute(command: Command, control: Arc<dyn ControlPlane>, config: &Config) -> Result<Value> {
    let storage = StorageManager::new(control.clone());
    let networks = NetworkManager::new(control.clone());

    match command {
        Command::Status => status(control.as_ref(), &storage, &networks).await,
        Command::Instances => Ok(json!(control.list_instances().await?)),
        Command::Pool { action } => pool(action, &storage).await,
        Command::Volume { action } => volume(action, &storage, config).await,
        Command::Network { action } => network(action, &networks).await,
    }
}

async fn status(
    control: &dyn ControlPlane,
    storage: &StorageManager,
    networks: &NetworkManager,
) -> Result<Value> {
    let pools = storage.list_info().await?;
    let capacity: u64 = pools.iter().map(|p| p.capacity.total).sum();
    let free: u64 = pools.iter().map(|p| p.capacity.free).sum();

    Ok(json!({
        "uri": control.uri().await?,
        "healthy": control.health_check().await?,
        "pools": pools.len(),
        "active_pools": pools.iter().filter(|p| p.active).count(),
        "capacity": pretty_bytes(capacity),
        "free": pretty_bytes(free),
        "networks": networks.list().await?.len(),
        "instances": control.list_instances().await?.len(),
    }))
}

fn state(name: &str, state: ResourceState) -> Value {
    json!({ "name": name, "state": state })
}

async fn pool(action: PoolCommand, storage: &StorageManager) -> Result<Value> {
    let value = match action {
        PoolCommand::List => json!(storage.list_info().await?),
        PoolCommand::Info { name } => json!(storage.describe(&name).await?),
        PoolCommand::Usage { name } => {
            let usage = storage.usage(&name).await?;
            json!({
                "name": name,
                "size": usage.size,
                "used": usage.used,
                "percent": usage.percent,
                "size_human": pretty_bytes(usage.size),
                "used_human": pretty_bytes(usage.used),
            })
        }
        PoolCommand::CreateDir { name, path } => {
            provision(storage, &name, DirectoryBackend::new(path).into()).await?
        }
        PoolCommand::CreateLogical { name, device } => {
            provision(storage, &name, LogicalBackend::new(device).into()).await?
        }
        PoolCommand::CreateRbd { name, pool, user, secret, hosts } => {
            let backend = hosts
                .into_iter()
                .fold(RbdBackend::new(pool, user, secret), |b, host| b.with_host(host));
            provision(storage, &name, backend.into()).await?
        }
        PoolCommand::CreateNetfs { name, host, export, path, format } => {
            let backend = NetfsBackend::new(host, export, path).with_format(format);
            provision(storage, &name, backend.into()).await?
        }
        PoolCommand::Start { name } => state(&name, storage.start(&name).await?),
        PoolCommand::Stop { name } => state(&name, storage.stop(&name).await?),
        PoolCommand::Delete { name } => {
            let lifecycle = storage.lifecycle();
            if lifecycle.state(ResourceKind::StoragePool, &name).await? == ResourceState::Active {
                storage.stop(&name).await?;
            }
            state(&name, storage.delete(&name).await?)
        }
        PoolCommand::Autostart { name, disable } => {
            storage.set_autostart(&name, !disable).await?;
            json!({ "name": name, "autostart": !disable })
        }
        PoolCommand::Refresh { name: Some(name) } => {
            json!({ "name": name, "refresh": storage.refresh(&name).await? })
        }
        PoolCommand::Refresh { name: None } => {
            let outcomes: Vec<Value> = storage
                .refresh_all()
                .await?
                .into_iter()
                .map(|(name, outcome)| json!({ "name": name, "refresh": outcome }))
                .collect();
            json!(outcomes)
        }
    };

    Ok(value)
}

async fn provision(storage: &StorageManager, name: &str, spec: PoolSpec) -> Result<Value> {
    let kind = spec.kind();
    let pool = storage
        .provision(name, spec)
        .await
        .with_context(|| format!("Failed to provision {} pool '{}'", kind, name))?;
    info!(pool = %name, "Storage pool ready");
    Ok(json!(pool))
}

async fn volume(action: VolumeCommand, storage: &StorageManager, config: &Config) -> Result<Value> {
    let volumes = storage.volumes();

    let value = match action {
        VolumeCommand::List { pool } => json!(volumes.list_all(&pool).await?),
        VolumeCommand::Info { pool, name } => json!(volumes.describe(&pool, &name).await?),
        VolumeCommand::Create { pool, name, size, format } => {
            let format = match format {
                Some(f) => VolumeFormat::parse_lenient(&f),
                None => config.volumes.format()?,
            };
            json!(volumes.create(&pool, &name, size, format).await?)
        }
        VolumeCommand::Clone { pool, source, dest, format } => {
            let format = format.as_deref().map(VolumeFormat::parse_lenient);
            json!(volumes.clone(&pool, &source, &dest, format).await?)
        }
        VolumeCommand::Resize { pool, name, size } => {
            volumes.resize(&pool, &name, size).await?;
            json!(volumes.describe(&pool, &name).await?)
        }
        VolumeCommand::Delete { pool, name } => {
            volumes.delete(&pool, &name).await?;
            json!({ "pool": pool, "name": name, "deleted": true })
        }
    };

    Ok(value)
}

async fn network(action: NetworkCommand, networks: &NetworkManager) -> Result<Value> {
    let value = match action {
        NetworkCommand::List => json!(networks.list_info().await?),
        NetworkCommand::Info { name } => json!(networks.describe(&name).await?),
        NetworkCommand::Create {
            name,
            mode,
            gateway,
            netmask,
            dhcp_start,
            dhcp_end,
            bridge,
            openvswitch,
            fixed_reservations,
        } => {
            let mut spec = NetworkSpec::new(name, mode);
            spec.gateway = gateway;
            spec.netmask = netmask;
            if let (Some(start), Some(end)) = (dhcp_start, dhcp_end) {
                spec = spec.with_dhcp(start, end);
            }
            if let Some(bridge) = bridge {
                spec = spec.with_bridge(bridge);
            }
            spec.openvswitch = openvswitch;
            spec.fixed_reservations = fixed_reservations;

            let network = networks
                .provision(&spec)
                .await
                .with_context(|| format!("Failed to provision network '{}'", spec.name))?;
            info!(network = %spec.name, "Network ready");
            json!(network)
        }
        NetworkCommand::Start { name } => state(&name, networks.start(&name).await?),
        NetworkCommand::Stop { name } => state(&name, networks.stop(&name).await?),
        NetworkCommand::Delete { name } => {
            let lifecycle = networks.lifecycle();
            if lifecycle.state(ResourceKind::Network, &name).await? == ResourceState::Active {
                networks.stop(&name).await?;
            }
            state(&name, networks.delete(&name).await?)
        }
        NetworkCommand::Autostart { name, disable } => {
            networks.set_autostart(&name, !disable).await?;
            json!({ "name": name, "autostart": networks.autostart(&name).await? })
        }
    };

    Ok(value)
}
