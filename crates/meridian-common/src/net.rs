//! IP address helpers

use std::net::IpAddr;

use crate::Error;

/// Parse an IP address, rejecting anything that is not a literal v4/v6 address
pub fn parse_ip(s: &str) -> Result<IpAddr, Error> {
    s.trim()
        .parse::<IpAddr>()
        .map_err(|_| Error::validation(format!("{s} is not a valid ip address")))
}

/// `https://<ip>:<port>`, bracketing IPv6 addresses
pub fn https_url(ip: IpAddr, port: i32) -> String {
    match ip {
        IpAddr::V4(v4) => format!("https://{v4}:{port}"),
        IpAddr::V6(v6) => format!("https://[{v6}]:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_bracket_v6_only() {
        assert_eq!(
            https_url(parse_ip("10.0.0.5").unwrap(), 32443),
            "https://10.0.0.5:32443"
        );
        assert_eq!(
            https_url(parse_ip("fd00::1").unwrap(), 32443),
            "https://[fd00::1]:32443"
        );
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(parse_ip("node-1.example.com").is_err());
        assert!(parse_ip("").is_err());
    }
}
