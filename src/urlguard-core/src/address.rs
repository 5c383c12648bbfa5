//! IP address classification for outbound request targets.
//!
//! Every predicate works on a numeric [`IpAddr`]. Textual input goes through
//! [`parse_address`], which accepts the alternate IPv4 spellings understood by
//! `inet_aton` (`0177.1`, `0x7f.0.0.1`, `2130706433`, `127.0.1`) so that no
//! encoding of a blocked address slips past a string comparison. IPv4-mapped
//! IPv6 addresses are reduced to their embedded IPv4 address before any check.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Input that is not an IP address in any accepted encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address: {0}")]
pub struct InvalidAddress(pub String);

/// Parse an IP literal in any supported encoding and canonicalize it.
///
/// Accepts bracketed IPv6 (`[::1]`), zone suffixes (`fe80::1%eth0`) and the
/// 1 to 4 part IPv4 forms with decimal, octal (`0` prefix) or hex (`0x`
/// prefix) components.
pub fn parse_address(input: &str) -> Result<IpAddr, InvalidAddress> {
    let trimmed = input.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    // Strip zone ID if present (e.g., "fe80::1%eth0")
    let unzoned = unbracketed
        .split_once('%')
        .map(|(ip, _)| ip)
        .unwrap_or(unbracketed);

    if let Ok(v6) = unzoned.parse::<Ipv6Addr>() {
        return Ok(canonicalize(IpAddr::V6(v6)));
    }

    parse_ipv4_lenient(unzoned)
        .map(IpAddr::V4)
        .ok_or_else(|| InvalidAddress(input.to_string()))
}

/// Parse an IPv4 address with `inet_aton` semantics.
///
/// `a` is a 32-bit value, `a.b` is 8.24 bits, `a.b.c` is 8.8.16 bits and
/// `a.b.c.d` is 8.8.8.8 bits.
pub fn parse_ipv4_lenient(input: &str) -> Option<Ipv4Addr> {
    if input.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(4);
    for part in input.split('.') {
        if parts.len() == 4 {
            return None;
        }
        parts.push(parse_ipv4_part(part)?);
    }

    let (last, leading) = parts.split_last()?;
    let mut value: u64 = 0;
    for (index, octet) in leading.iter().enumerate() {
        if *octet > 0xff {
            return None;
        }
        value |= octet << (24 - 8 * index);
    }

    let remaining_bits = 32 - 8 * leading.len();
    if *last >= 1u64 << remaining_bits {
        return None;
    }
    value |= last;

    u32::try_from(value).ok().map(Ipv4Addr::from)
}

fn parse_ipv4_part(part: &str) -> Option<u64> {
    let (digits, radix) = if let Some(hex) = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
    {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    u64::from_str_radix(digits, radix)
        .ok()
        .filter(|value| *value <= u64::from(u32::MAX))
}

/// Reduce an IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) to its IPv4 form.
pub fn canonicalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// 127.0.0.0/8 and ::1.
pub fn is_loopback(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// `127.0.0.1`, `::1` and the unspecified addresses.
///
/// These are reported as "localhost" rather than as generic loopback.
pub fn is_localhost(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST || v4.is_unspecified(),
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST || v6.is_unspecified(),
    }
}

/// 169.254.0.0/16 and fe80::/10.
pub fn is_link_local(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80
        }
    }
}

/// RFC 1918 ranges, IPv6 unique local (fc00::/7) and site local (fec0::/10).
pub fn is_private_range(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => v4.is_private(), // 10/8, 172.16/12, 192.168/16 (RFC 1918)
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            (octets[0] & 0xfe) == 0xfc                          // fc00::/7 (RFC 4193)
                || (octets[0] == 0xfe && (octets[1] & 0xc0) == 0xc0) // fec0::/10 (RFC 3879)
        }
    }
}

/// Carrier-grade NAT range 100.64.0.0/10 (RFC 6598).
pub fn is_shared_address_space(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => ipv4_in_cidr(v4, [100, 64, 0, 0], 10),
        IpAddr::V6(_) => false,
    }
}

/// Documentation ranges (RFC 5737, RFC 3849).
pub fn is_documentation_range(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => {
            ipv4_in_cidr(v4, [192, 0, 2, 0], 24)        // TEST-NET-1
                || ipv4_in_cidr(v4, [198, 51, 100, 0], 24) // TEST-NET-2
                || ipv4_in_cidr(v4, [203, 0, 113, 0], 24) // TEST-NET-3
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            segments[0] == 0x2001 && segments[1] == 0x0db8 // 2001:db8::/32
        }
    }
}

/// `0.0.0.0` and `::`.
pub fn is_unspecified(ip: IpAddr) -> bool {
    canonicalize(ip).is_unspecified()
}

/// `255.255.255.255`, including `::ffff:ffff:ffff`.
pub fn is_limited_broadcast(ip: IpAddr) -> bool {
    match canonicalize(ip) {
        IpAddr::V4(v4) => v4.is_broadcast(),
        IpAddr::V6(_) => false,
    }
}

/// Check if IPv4 is in a CIDR range.
fn ipv4_in_cidr(ip: Ipv4Addr, base: [u8; 4], prefix: u8) -> bool {
    let ip = u32::from(ip);
    let base = u32::from(Ipv4Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (ip & mask) == (base & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(input: &str) -> IpAddr {
        parse_address(input).unwrap()
    }

    #[test]
    fn test_loopback_encodings() {
        for encoding in [
            "127.0.0.1",
            "0177.1",
            "0x7f.1",
            "0x7f.0.0.1",
            "0x7f000001",
            "017700000001",
            "2130706433",
            "127.000.000.001",
            "127.0.1",
            "::ffff:127.0.0.1",
            "::ffff:7f00:1",
            "[0:0:0:0:0:ffff:127.0.0.1]",
        ] {
            assert_eq!(
                ip(encoding),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                "{encoding} should parse as 127.0.0.1"
            );
            assert!(is_loopback(ip(encoding)), "{encoding} should be loopback");
        }
    }

    #[test]
    fn test_limited_broadcast_encodings() {
        for encoding in [
            "255.255.255.255",
            "0377.0377.0377.0377",
            "0377.00000000377.00377.0000377",
            "0xff.0xff.0xff.0xff",
            "0xffffffff",
            "4294967295",
            "[::ffff:ffff:ffff]",
            "[0000:0000:0000:0000:0000:ffff:ffff:ffff]",
        ] {
            assert!(
                is_limited_broadcast(ip(encoding)),
                "{encoding} should be the limited broadcast address"
            );
        }
        assert!(!is_limited_broadcast(ip("255.255.255.254")));
    }

    #[test]
    fn test_invalid_addresses() {
        for input in [
            "",
            "1.1.1.1.1",
            "45645632345",
            "256.1.1.1",
            "1.16777216",
            "0x",
            "08.1.1.1",
            "garbage456:more345gar:bage",
            "example.com",
            "+1.2.3.4",
        ] {
            assert!(parse_address(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_partial_forms() {
        assert_eq!(ip("10.1"), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(ip("10.1.258"), IpAddr::V4(Ipv4Addr::new(10, 1, 1, 2)));
        assert_eq!(ip("0"), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private_range(ip("10.0.0.2")));
        assert!(is_private_range(ip("172.16.0.2")));
        assert!(is_private_range(ip("192.168.1.2")));
        assert!(is_private_range(ip("::ffff:c0a8:102")));
        assert!(is_private_range(ip("fc00:bf8b:e62c:abcd:abcd:aaaa:aaaa:aaaa")));
        assert!(is_private_range(ip("feef::1")));
        assert!(is_private_range(ip("fee2::")));

        assert!(!is_private_range(ip("8.8.8.8")));
        assert!(!is_private_range(ip("2606:4700::1")));
        assert!(!is_private_range(ip("fe80::1")));
    }

    #[test]
    fn test_link_local() {
        assert!(is_link_local(ip("169.254.169.254")));
        assert!(is_link_local(ip("::ffff:a9fe:a9fe")));
        assert!(is_link_local(ip("fe80::c800:eff:fe74:8")));
        assert!(!is_link_local(ip("fec0::1")));
    }

    #[test]
    fn test_shared_and_documentation() {
        assert!(is_shared_address_space(ip("100.64.0.0")));
        assert!(is_shared_address_space(ip("100.127.255.255")));
        assert!(!is_shared_address_space(ip("100.128.0.0")));

        assert!(is_documentation_range(ip("192.0.2.1")));
        assert!(is_documentation_range(ip("198.51.100.7")));
        assert!(is_documentation_range(ip("203.0.113.200")));
        assert!(is_documentation_range(ip("2001:db8:1f70::999:de8:7648:6e8")));
        assert!(!is_documentation_range(ip("93.184.216.34")));
    }

    #[test]
    fn test_localhost_and_unspecified() {
        for input in ["0.0.0.0", "::", "::ffff:0:0", "127.0.0.1", "::1"] {
            assert!(is_localhost(ip(input)), "{input} should be localhost");
        }
        assert!(!is_localhost(ip("127.0.0.2")));
        assert!(is_unspecified(ip("::ffff:0.0.0.0")));
    }

    #[test]
    fn test_canonicalize_keeps_native_ipv6() {
        let v6 = ip("2606:4700::1");
        assert!(matches!(canonicalize(v6), IpAddr::V6(_)));
        // IPv4-compatible (deprecated) form is not treated as mapped
        assert!(matches!(ip("::1"), IpAddr::V6(_)));
    }
}
