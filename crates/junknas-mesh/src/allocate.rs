//! Overlay address allocation for bootstrap minting.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::MeshError;

/// Pick a free host address in the /24 of `local_wg_ip`.
///
/// Host octet 1 is reserved for the hub; already-used addresses (the local
/// node and every stored peer) are skipped; the first free host in
/// `[2, 254]` wins.
pub fn allocate_peer_ip<'a>(
    local_wg_ip: &str,
    used: impl IntoIterator<Item = &'a str>,
) -> Result<String, MeshError> {
    let local: Ipv4Addr = local_wg_ip
        .parse()
        .map_err(|_| MeshError::InvalidAddress(local_wg_ip.to_string()))?;
    let prefix = [local.octets()[0], local.octets()[1], local.octets()[2]];

    let mut taken: HashSet<u8> = HashSet::new();
    taken.insert(local.octets()[3]);
    taken.insert(1);
    for ip in used {
        if let Ok(addr) = ip.parse::<Ipv4Addr>() {
            let octets = addr.octets();
            if octets[..3] == prefix {
                taken.insert(octets[3]);
            }
        }
    }

    (2..=254u8)
        .find(|host| !taken.contains(host))
        .map(|host| format!("{}.{}.{}.{}", prefix[0], prefix[1], prefix[2], host))
        .ok_or(MeshError::SubnetFull)
}
