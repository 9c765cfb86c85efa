//! Multiaddress classification helpers.
//!
//! Announcements carry the addresses a publisher claims to be reachable
//! at. When address filtering is enabled the receiver keeps only
//! addresses a remote peer could plausibly dial: globally routable IPs
//! and DNS names. Everything scoped to a host or site (loopback,
//! RFC 1918, IPv6 unique-local, link-local) is stripped.

use std::net::{Ipv4Addr, Ipv6Addr};

use multiaddr::{Multiaddr, Protocol};

/// Returns the addresses whose first component is publicly routable.
///
/// DNS names pass unless they name `localhost`; addresses that do not
/// start with an IP or DNS component are dropped.
pub fn filter_public(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter(|addr| is_public_addr(addr))
        .cloned()
        .collect()
}

/// Reports whether the first component of `addr` is a globally routable
/// IP address or a non-local DNS name.
pub fn is_public_addr(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => is_public_ipv4(ip),
        Some(Protocol::Ip6(ip)) => is_public_ipv6(ip),
        Some(Protocol::Dns(host))
        | Some(Protocol::Dns4(host))
        | Some(Protocol::Dns6(host))
        | Some(Protocol::Dnsaddr(host)) => host != "localhost",
        _ => false,
    }
}

/// Returns the addresses that carry an `http` or `https` component.
pub fn find_http_addrs(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter(|addr| {
            addr.iter()
                .any(|p| matches!(p, Protocol::Http | Protocol::Https))
        })
        .cloned()
        .collect()
}

/// Parse a batch of multiaddr strings, failing on the first bad one.
pub fn strings_to_multiaddrs<S: AsRef<str>>(
    addrs: &[S],
) -> Result<Vec<Multiaddr>, multiaddr::Error> {
    addrs.iter().map(|s| s.as_ref().parse()).collect()
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast())
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    let seg = ip.segments();
    // Unique-local fc00::/7 and link-local fe80::/10.
    if seg[0] & 0xfe00 == 0xfc00 || seg[0] & 0xffc0 == 0xfe80 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_public_keeps_routable_addrs() {
        let addrs = strings_to_multiaddrs(&[
            "/ip4/10.255.0.0/tcp/443",
            "/ip4/11.0.0.0/tcp/80",
            "/ip6/fc00::/tcp/1717",
            "/ip6/fe00::/tcp/8080",
            "/ip4/192.168.11.22/tcp/9999",
            "/dns4/example.net/tcp/1234",
            "/ip4/127.0.0.1/tcp/9999",
            "/dns4/localhost/tcp/1234",
            "/ip6/::/tcp/3105/http",
            "/ip4/0.0.0.0/tcp/3105",
        ])
        .unwrap();

        let expected = vec![addrs[1].clone(), addrs[3].clone(), addrs[5].clone()];
        assert_eq!(filter_public(&addrs), expected);

        assert!(filter_public(&[]).is_empty());
    }

    #[test]
    fn link_local_and_multicast_rejected() {
        let addrs = strings_to_multiaddrs(&[
            "/ip4/169.254.0.1/tcp/80",
            "/ip6/fe80::1/tcp/80",
            "/ip4/224.0.0.1/udp/80",
            "/ip6/ff02::1/udp/80",
            "/ip4/255.255.255.255/tcp/80",
        ])
        .unwrap();

        for addr in &addrs {
            assert!(!is_public_addr(addr), "{addr} should not be public");
        }
    }

    #[test]
    fn non_ip_first_component_rejected() {
        let addr: Multiaddr = "/tcp/80".parse().unwrap();
        assert!(!is_public_addr(&addr));
    }

    #[test]
    fn find_http_addrs_matches_both_schemes() {
        let addrs = strings_to_multiaddrs(&[
            "/ip4/11.0.0.0/tcp/80/http",
            "/ip6/fc00::/tcp/1717",
            "/ip6/fe00::/tcp/8080/https",
            "/dns4/example.net/tcp/1234",
        ])
        .unwrap();

        let expected = vec![addrs[0].clone(), addrs[2].clone()];
        assert_eq!(find_http_addrs(&addrs), expected);
    }

    #[test]
    fn strings_to_multiaddrs_reports_bad_input() {
        assert!(strings_to_multiaddrs(&["not a multiaddr"]).is_err());
    }
}
