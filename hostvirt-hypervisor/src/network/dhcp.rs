//! Static DHCP reservations.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use rand::Rng;

use crate::error::{HypervisorError, Result};
use super::types::{DhcpRange, FixedReservation};

/// Random MAC address in the QEMU range (`52:54:00:xx:xx:xx`).
pub fn generate_mac<R: Rng + ?Sized>(rng: &mut R) -> String {
    let bytes: [u8; 3] = rng.gen();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        bytes[0] & 0x7f,
        bytes[1],
        bytes[2]
    )
}

/// Pin every address of `range` to a freshly generated MAC.
///
/// Addresses are the gateway's first three octets followed by each final
/// octet from the range start to its end, so the range has to sit in the
/// gateway's /24. MACs are distinct within the returned list.
pub fn synthesize_reservations(gateway: Ipv4Addr, range: DhcpRange) -> Result<Vec<FixedReservation>> {
    let [a, b, c, _] = gateway.octets();
    let start = range.start.octets();
    let end = range.end.octets();

    if start[..3] != [a, b, c] || end[..3] != [a, b, c] {
        return Err(HypervisorError::InvalidSpec(format!(
            "DHCP range {}-{} is not in the /24 of gateway {}",
            range.start, range.end, gateway
        )));
    }
    if start[3] > end[3] {
        return Err(HypervisorError::InvalidSpec(format!(
            "DHCP range start {} is after its end {}",
            range.start, range.end
        )));
    }

    let mut rng = rand::thread_rng();
    let mut seen = HashSet::new();

    let reservations = (start[3]..=end[3])
        .map(|last| {
            let mac = loop {
                let mac = generate_mac(&mut rng);
                if seen.insert(mac.clone()) {
                    break mac;
                }
            };
            FixedReservation {
                address: Ipv4Addr::new(a, b, c, last),
                mac,
            }
        })
        .collect();

    Ok(reservations)
}
