//! Client identity for rate limiting.
//!
//! The client address is taken from forwarding headers when they carry a
//! public address, otherwise from the peer socket. Limiter state only ever
//! sees a sha-256 digest of it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use sha2::{Digest, Sha256};

/// Forwarding headers, in the order they are consulted.
pub const FORWARDED_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "client-ip"];

/// Address used when nothing better is known.
pub const UNKNOWN_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Picks the client address.
///
/// `forwarded` yields header values in [`FORWARDED_HEADERS`] order. For each
/// value only the first comma-separated entry is considered, and only if it
/// is a public address. Falls back to `peer`, then to [`UNKNOWN_ADDR`].
pub fn resolve_client_ip<'a, I>(forwarded: I, peer: Option<IpAddr>) -> IpAddr
where
    I: IntoIterator<Item = &'a str>,
{
    forwarded
        .into_iter()
        .filter_map(|value| value.split(',').next())
        .filter_map(|first| first.trim().parse::<IpAddr>().ok())
        .find(is_public)
        .or(peer)
        .unwrap_or(UNKNOWN_ADDR)
}

/// Whether `addr` is routable on the public internet.
pub fn is_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(addr: &Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    !(addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_documentation()
        || addr.is_unspecified()
        || addr.is_multicast()
        || a == 0
        // shared address space, 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
        // benchmarking, 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        // reserved, 240.0.0.0/4
        || a >= 240)
}

fn is_public_v6(addr: &Ipv6Addr) -> bool {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_public_v4(&mapped);
    }
    let first = addr.segments()[0];
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_multicast()
        // unique local, fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local, fe80::/10
        || (first & 0xffc0) == 0xfe80
        // documentation, 2001:db8::/32
        || (first == 0x2001 && addr.segments()[1] == 0x0db8))
}

/// Hashed client identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_ip(addr: IpAddr) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(addr.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines.
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(raw: &str) -> IpAddr {
        raw.parse().expect("valid test address")
    }

    #[test]
    fn first_forwarded_entry_wins() {
        let resolved = resolve_client_ip(["203.0.113.9, 8.8.8.8", "1.1.1.1"], Some(ip("10.0.0.1")));
        // 203.0.113.0/24 is documentation space, so the next header is used.
        assert_eq!(resolved, ip("1.1.1.1"));

        let resolved = resolve_client_ip(["8.8.4.4, 9.9.9.9"], Some(ip("10.0.0.1")));
        assert_eq!(resolved, ip("8.8.4.4"));
    }

    #[test]
    fn private_forwarded_values_fall_back_to_peer() {
        let resolved = resolve_client_ip(
            ["10.1.2.3", "192.168.0.4", "127.0.0.1"],
            Some(ip("93.184.216.34")),
        );
        assert_eq!(resolved, ip("93.184.216.34"));
    }

    #[test]
    fn garbage_is_ignored() {
        let resolved = resolve_client_ip(["not-an-ip", ""], None);
        assert_eq!(resolved, UNKNOWN_ADDR);
    }

    #[test]
    fn peer_is_used_even_when_private() {
        let resolved = resolve_client_ip(std::iter::empty(), Some(ip("127.0.0.1")));
        assert_eq!(resolved, ip("127.0.0.1"));
    }

    #[test]
    fn reserved_ranges() {
        for raw in [
            "0.1.2.3",
            "100.64.0.1",
            "169.254.1.1",
            "198.18.0.1",
            "224.0.0.1",
            "240.0.0.1",
            "255.255.255.255",
            "::",
            "::1",
            "fd00::1",
            "fe80::1",
            "2001:db8::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(!is_public(&ip(raw)), "{raw} should not be public");
        }
        for raw in ["8.8.8.8", "100.128.0.1", "2606:4700::1111", "::ffff:8.8.8.8"] {
            assert!(is_public(&ip(raw)), "{raw} should be public");
        }
    }

    #[test]
    fn identity_is_hashed() {
        let key = IdentityKey::from_ip(ip("8.8.8.8"));
        assert_eq!(key.as_str().len(), 64);
        assert!(!key.as_str().contains("8.8.8.8"));
        assert_eq!(key, IdentityKey::from_ip(ip("8.8.8.8")));
        assert_ne!(key, IdentityKey::from_ip(ip("8.8.4.4")));
    }
}
