//! # hostvirt Common
//!
//! Shared utilities for the hostvirt crates.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use hostvirt_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty).unwrap();
//! tracing::info!(pool = "images", "Storage pool provisioned");
//! ```

pub mod logging;
pub mod units;

// Re-export logging functions
pub use logging::{init_logging, init_logging_json, LogFormat};
pub use units::pretty_bytes;
