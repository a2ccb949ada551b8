//! # hostvirt
//!
//! Manage storage pools, volumes and virtual networks through libvirt.
//!
//! ## Usage
//! ```bash
//! hostvirt pool create-dir images --path /var/lib/hostvirt/images
//! hostvirt volume create images disk0 --size 20G
//! hostvirt --dev network create lab --mode nat \
//!     --gateway 192.168.50.1 --netmask 255.255.255.0 \
//!     --dhcp-start 192.168.50.100 --dhcp-end 192.168.50.199
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use hostvirt_cli::{commands, session, Args, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration before logging, it decides the log format
    let config = Config::resolve(args.config.as_deref())?.with_cli_overrides(&args);
    config.validate()?;

    hostvirt_common::init_logging(&config.logging.level, config.logging.format)?;

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.session.backend,
        uri = %config.session.uri,
        "hostvirt configured"
    );

    let control = session::open(&config.session).await?;

    let output = match commands::execute(args.command, control, &config).await {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "Command failed");
            return Err(e);
        }
    };

    let rendered = serde_json::to_string_pretty(&output).context("Failed to render output")?;
    println!("{}", rendered);

    Ok(())
}
