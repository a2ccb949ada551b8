//! Command-line argument parsing.

use std::net::Ipv4Addr;

use clap::{Parser, Subcommand};
use hostvirt_hypervisor::ForwardMode;

/// hostvirt - storage pool, volume and virtual network management
#[derive(Parser, Debug)]
#[command(name = "hostvirt")]
#[command(about = "hostvirt - storage pool, volume and virtual network management")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, global = true, env = "HOSTVIRT_CONFIG")]
    pub config: Option<String>,

    /// Control plane URI (e.g., qemu:///system, qemu+ssh://root@host/system)
    #[arg(long, global = true, env = "HOSTVIRT_URI")]
    pub uri: Option<String>,

    /// Use the in-memory mock session instead of libvirt
    #[arg(long, global = true)]
    pub dev: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "HOSTVIRT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show session URI, health and resource counts
    Status,

    /// List instance names (running first, then defined)
    Instances,

    /// Storage pool operations
    Pool {
        #[command(subcommand)]
        action: PoolCommand,
    },

    /// Storage volume operations
    Volume {
        #[command(subcommand)]
        action: VolumeCommand,
    },

    /// Virtual network operations
    Network {
        #[command(subcommand)]
        action: NetworkCommand,
    },
}

// ============================================================================
// Storage pools
// ============================================================================

#[derive(Subcommand, Debug, Clone)]
pub enum PoolCommand {
    /// List pools with capacity and volumes
    List,

    /// Describe one pool
    Info { name: String },

    /// Show size, used bytes and percentage of a pool
    Usage { name: String },

    /// Provision a directory-backed pool
    CreateDir {
        name: String,
        /// Directory holding the volume files
        #[arg(long)]
        path: String,
    },

    /// Provision an LVM volume group pool on a block device
    CreateLogical {
        name: String,
        /// Physical device backing the volume group (e.g., /dev/sdb)
        #[arg(long)]
        device: String,
    },

    /// Provision a Ceph RBD pool
    CreateRbd {
        name: String,
        /// Ceph pool name
        #[arg(long)]
        pool: String,
        /// Ceph user for authentication
        #[arg(long)]
        user: String,
        /// UUID of the libvirt secret holding the Ceph key
        #[arg(long)]
        secret: String,
        /// Monitor host, repeat for up to three monitors
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
    },

    /// Provision a pool on a network filesystem export
    CreateNetfs {
        name: String,
        /// Export server
        #[arg(long)]
        host: String,
        /// Exported directory on the server
        #[arg(long)]
        export: String,
        /// Local mount point
        #[arg(long)]
        path: String,
        /// Filesystem type (auto, nfs, glusterfs, cifs)
        #[arg(long, default_value = "nfs")]
        format: String,
    },

    /// Start a pool
    Start { name: String },

    /// Stop a pool
    Stop { name: String },

    /// Stop (if active) and undefine a pool
    Delete { name: String },

    /// Enable autostart on a pool
    Autostart {
        name: String,
        /// Disable instead of enable
        #[arg(long)]
        disable: bool,
    },

    /// Rescan a pool, or every pool when no name is given
    Refresh { name: Option<String> },
}

// ============================================================================
// Volumes
// ============================================================================

#[derive(Subcommand, Debug, Clone)]
pub enum VolumeCommand {
    /// List volumes of a pool
    List { pool: String },

    /// Describe one volume
    Info { pool: String, name: String },

    /// Create a volume
    Create {
        pool: String,
        name: String,
        /// Capacity (bytes, or with a K/M/G/T suffix)
        #[arg(long, value_parser = parse_size)]
        size: u64,
        /// Disk format (defaults to volumes.default_format)
        #[arg(long)]
        format: Option<String>,
    },

    /// Clone a volume within its pool
    Clone {
        pool: String,
        source: String,
        dest: String,
        /// Disk format of the copy (defaults to the source's)
        #[arg(long)]
        format: Option<String>,
    },

    /// Grow a volume
    Resize {
        pool: String,
        name: String,
        /// New capacity (bytes, or with a K/M/G/T suffix)
        #[arg(long, value_parser = parse_size)]
        size: u64,
    },

    /// Delete a volume
    Delete { pool: String, name: String },
}

// ============================================================================
// Networks
// ============================================================================

#[derive(Subcommand, Debug, Clone)]
pub enum NetworkCommand {
    /// List networks
    List,

    /// Describe one network
    Info { name: String },

    /// Provision a virtual network
    Create {
        name: String,
        /// Forward mode (none, nat, route, bridge)
        #[arg(long, default_value = "nat")]
        mode: ForwardMode,
        /// Host address on the network
        #[arg(long)]
        gateway: Option<Ipv4Addr>,
        /// Netmask of the network
        #[arg(long)]
        netmask: Option<Ipv4Addr>,
        /// First DHCP address
        #[arg(long, requires = "dhcp_end")]
        dhcp_start: Option<Ipv4Addr>,
        /// Last DHCP address
        #[arg(long, requires = "dhcp_start")]
        dhcp_end: Option<Ipv4Addr>,
        /// Existing host bridge (bridge mode)
        #[arg(long)]
        bridge: Option<String>,
        /// Attach through an Open vSwitch port
        #[arg(long)]
        openvswitch: bool,
        /// Pin every DHCP address to a generated MAC
        #[arg(long)]
        fixed_reservations: bool,
    },

    /// Start a network
    Start { name: String },

    /// Stop a network
    Stop { name: String },

    /// Stop (if active) and undefine a network
    Delete { name: String },

    /// Enable autostart on a network
    Autostart {
        name: String,
        /// Disable instead of enable
        #[arg(long)]
        disable: bool,
    },
}

/// Parse a size such as `1073741824`, `512M` or `20G` (binary units).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                'T' => 40,
                other => return Err(format!("unknown size suffix '{}'", other)),
            };
            (&s[..i], shift)
        }
        _ => (s, 0),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", s))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size '{}' is too large", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("20g").unwrap(), 20 * 1024 * 1024 * 1024);
        assert!(parse_size("10X").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("99999999999T").is_err());
    }

    #[test]
    fn test_parse_network_create() {
        let args = Args::parse_from([
            "hostvirt", "--dev", "network", "create", "lab",
            "--mode", "route",
            "--gateway", "10.0.0.1", "--netmask", "255.255.255.0",
            "--dhcp-start", "10.0.0.100", "--dhcp-end", "10.0.0.110",
            "--fixed-reservations",
        ]);

        assert!(args.dev);
        match args.command {
            Command::Network { action: NetworkCommand::Create { name, mode, dhcp_start, fixed_reservations, .. } } => {
                assert_eq!(name, "lab");
                assert_eq!(mode, ForwardMode::Route);
                assert_eq!(dhcp_start, Some(Ipv4Addr::new(10, 0, 0, 100)));
                assert!(fixed_reservations);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rbd_requires_host() {
        let result = Args::try_parse_from([
            "hostvirt", "pool", "create-rbd", "ceph",
            "--pool", "rbd", "--user", "libvirt",
            "--secret", "2d5a7b3c-9e1f-4a6b-8c0d-1e2f3a4b5c6d",
        ]);
        assert!(result.is_err());
    }
}
