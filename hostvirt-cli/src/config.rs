//! Configuration management for the hostvirt CLI.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use hostvirt_common::LogFormat;
use hostvirt_hypervisor::VolumeFormat;

use crate::cli::Args;

/// Location tried when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostvirt/hostvirt.yaml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control plane session
    pub session: SessionConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Volume defaults
    pub volumes: VolumeConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file named on the command line, or the default location if
    /// it exists, or fall back to built-in defaults.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref uri) = args.uri {
            self.session.uri = uri.clone();
        }

        if args.dev {
            self.session.backend = SessionBackend::Mock;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.log_json {
            self.logging.format = LogFormat::Json;
        }

        self
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            bail!(
                "Invalid log level '{}', expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        if self.session.uri.trim().is_empty() {
            bail!("session.uri must not be empty");
        }

        self.volumes
            .format()
            .context("Invalid volumes.default_format")?;

        Ok(())
    }
}

/// Control plane session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session implementation
    pub backend: SessionBackend,
    /// Libvirt connection URI
    pub uri: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            uri: "qemu:///system".to_string(),
        }
    }
}

/// Session implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// In-memory control plane for development and testing
    Mock,
    /// Libvirt daemon
    Libvirt,
}

impl Default for SessionBackend {
    fn default() -> Self {
        if cfg!(feature = "libvirt") {
            Self::Libvirt
        } else {
            Self::Mock
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// pretty or json
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Volume defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Format used when `volume create` is not given one
    pub default_format: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            default_format: "qcow2".to_string(),
        }
    }
}

impl VolumeConfig {
    /// The configured default format.
    pub fn format(&self) -> Result<VolumeFormat> {
        Ok(self.default_format.parse::<VolumeFormat>()?)
    }
}
