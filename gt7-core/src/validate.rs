//! PlayStation address validation

use crate::error::AddressError;
use std::net::Ipv4Addr;

/// Validate a user-supplied PlayStation address.
///
/// Surrounding whitespace is ignored. Only dotted-quad IPv4 is accepted.
pub fn validate_ps_ip(input: &str) -> Result<Ipv4Addr, AddressError> {
    let ip = input.trim();
    if ip.is_empty() {
        return Err(AddressError::Empty);
    }

    let octets: Vec<&str> = ip.split('.').collect();
    let dotted_quad = octets.len() == 4
        && octets
            .iter()
            .all(|o| (1..=3).contains(&o.len()) && o.bytes().all(|b| b.is_ascii_digit()));
    if !dotted_quad {
        return Err(AddressError::Format(ip.to_string()));
    }

    ip.parse::<Ipv4Addr>()
        .map_err(|_| AddressError::Format(ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert_eq!(
            validate_ps_ip("192.168.1.20"),
            Ok(Ipv4Addr::new(192, 168, 1, 20))
        );
        assert_eq!(
            validate_ps_ip("  10.0.0.5\n"),
            Ok(Ipv4Addr::new(10, 0, 0, 5))
        );
    }

    #[test]
    fn test_empty_is_rejected() {
        assert_eq!(validate_ps_ip(""), Err(AddressError::Empty));
        assert_eq!(validate_ps_ip("   "), Err(AddressError::Empty));
    }

    #[test]
    fn test_bad_format_is_rejected() {
        for bad in [
            "192.168.1",
            "192.168.1.256",
            "a.b.c.d",
            "1.2.3.4.5",
            "1234.1.1.1",
            "::1",
            "demo",
        ] {
            assert!(
                matches!(validate_ps_ip(bad), Err(AddressError::Format(_))),
                "{bad} should be rejected"
            );
        }
    }
}
