use std::fmt;
use std::net::Ipv6Addr;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::EndpointError;

/// A validated controller endpoint, `ws://<address>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    port: u16,
}

impl Endpoint {
    /// Validate operator input before any socket is opened.
    ///
    /// Both fields are trimmed. Empty input is reported as
    /// [`EndpointError::MissingField`].
    pub fn parse(address: &str, port: &str) -> Result<Self, EndpointError> {
        let address = address.trim();
        let port = port.trim();
        if address.is_empty() || port.is_empty() {
            return Err(EndpointError::MissingField);
        }

        let port = Some(port)
            .filter(|p| p.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| EndpointError::InvalidPort(port.to_string()))?;

        if address
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | '\\'))
        {
            return Err(EndpointError::InvalidAddress(address.to_string()));
        }

        // Anything with a colon must be an IPv6 literal.
        let bare = address.trim_start_matches('[').trim_end_matches(']');
        if bare.contains(':') && bare.parse::<Ipv6Addr>().is_err() {
            return Err(EndpointError::InvalidAddress(address.to_string()));
        }

        let endpoint = Self {
            address: bare.to_string(),
            port,
        };
        match endpoint.url().parse::<Uri>() {
            Ok(uri) if uri.host().is_some_and(|h| !h.is_empty()) => Ok(endpoint),
            _ => Err(EndpointError::InvalidAddress(address.to_string())),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Full WebSocket URL. Bare IPv6 literals are bracketed.
    pub fn url(&self) -> String {
        if self.address.contains(':') {
            format!("ws://[{}]:{}", self.address, self.port)
        } else {
            format!("ws://{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_ws_url() {
        let ep = Endpoint::parse("192.168.58.101", "1145").unwrap();
        assert_eq!(ep.url(), "ws://192.168.58.101:1145");
        assert_eq!(ep.port(), 1145);
        assert_eq!(ep.address(), "192.168.58.101");
    }

    #[test]
    fn trims_input() {
        let ep = Endpoint::parse("  localhost ", " 8080\n").unwrap();
        assert_eq!(ep.url(), "ws://localhost:8080");
    }

    #[test]
    fn empty_fields_are_missing() {
        assert_eq!(Endpoint::parse("", "8080"), Err(EndpointError::MissingField));
        assert_eq!(Endpoint::parse("10.0.0.1", ""), Err(EndpointError::MissingField));
        assert_eq!(Endpoint::parse("   ", "8080"), Err(EndpointError::MissingField));
    }

    #[test]
    fn rejects_bad_ports() {
        for port in ["http", "0", "65536", "-1", "80a", "+80"] {
            assert!(
                matches!(Endpoint::parse("10.0.0.1", port), Err(EndpointError::InvalidPort(_))),
                "{port:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_bad_addresses() {
        for addr in ["10.0.0.1/path", "user@host", "two words", "host:99"] {
            assert!(
                matches!(Endpoint::parse(addr, "8080"), Err(EndpointError::InvalidAddress(_))),
                "{addr:?} should be rejected"
            );
        }
    }

    #[test]
    fn brackets_ipv6() {
        let ep = Endpoint::parse("::1", "9000").unwrap();
        assert_eq!(ep.url(), "ws://[::1]:9000");
        let ep = Endpoint::parse("[fe80::1]", "9000").unwrap();
        assert_eq!(ep.address(), "fe80::1");
    }
}
