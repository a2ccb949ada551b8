//! Libvirt control plane session.
//!
//! Requires the `libvirt` feature to be enabled and the system to have
//! libvirt installed.

#[cfg(feature = "libvirt")]
mod backend;

#[cfg(feature = "libvirt")]
pub use backend::LibvirtSession;

/// Check if the libvirt session is compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "libvirt")
}
