//! # hostvirt CLI
//!
//! Operator front end for the `hostvirt-hypervisor` management layer. It
//! loads an optional YAML config, opens one control plane session and runs a
//! single command against it, printing the result as JSON.

pub mod cli;
pub mod commands;
pub mod config;
pub mod session;

pub use cli::{Args, Command};
pub use config::Config;
