//! Destination URIs for bindings and notification sources
//!
//! Bindings point at peers using a restricted URI form:
//! `[coap[s]:]//<host>[:<port>]<path>`. The scheme is optional, the host is
//! mandatory (bracketed IPv6 literals allowed), the port is optional and the
//! path must begin with `/`.

use std::fmt;

/// URI scheme for a binding destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// No scheme prefix was present
    #[default]
    None,
    Coap,
    Coaps,
}

impl Scheme {
    /// Textual prefix including the trailing colon, empty for [Scheme::None]
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::None => "",
            Scheme::Coap => "coap:",
            Scheme::Coaps => "coaps:",
        }
    }
}

/// A parsed destination URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub host: String,
    /// Zero when the URI did not carry an explicit port
    pub port: u16,
    /// Always begins with `/`
    pub path: String,
}

/// Error produced when URI text doesn't match the binding URI grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("missing colon after URI scheme")]
    SchemeColon,
    #[error("missing // before URI host")]
    HostMarker,
    #[error("URI host is empty")]
    EmptyHost,
    #[error("invalid URI port")]
    InvalidPort,
    #[error("URI path must start with /")]
    InvalidPath,
}

impl Uri {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16, path: impl Into<String>) -> Uri {
        Uri {
            scheme,
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Parses URI text of the form `[coap[s]:]//<host>[:<port>]<path>`
    pub fn parse(text: &str) -> Result<Uri, UriError> {
        let mut rest = text;

        // Optional coap(s) scheme prefix, colon required when present
        let scheme = if let Some(after) = rest.strip_prefix("coaps") {
            rest = after.strip_prefix(':').ok_or(UriError::SchemeColon)?;
            Scheme::Coaps
        } else if let Some(after) = rest.strip_prefix("coap") {
            rest = after.strip_prefix(':').ok_or(UriError::SchemeColon)?;
            Scheme::Coap
        } else {
            Scheme::None
        };

        // The authority marker is mandatory
        rest = rest.strip_prefix("//").ok_or(UriError::HostMarker)?;

        // Bracketed IPv6 literals keep their colons; otherwise the host runs
        // until the port separator or the path
        let host_len = if rest.starts_with('[') {
            match rest.find(']') {
                Some(end) => {
                    end + 1
                        + rest[end + 1..]
                            .find([':', '/'])
                            .unwrap_or(rest.len() - end - 1)
                }
                None => rest.len(),
            }
        } else {
            rest.find([':', '/']).unwrap_or(rest.len())
        };
        let host = &rest[..host_len];
        if host.is_empty() {
            return Err(UriError::EmptyHost);
        }
        rest = &rest[host_len..];

        // Optional base-10 port
        let port = if let Some(after) = rest.strip_prefix(':') {
            let digits = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
            let port = after[..digits]
                .parse::<u16>()
                .map_err(|_| UriError::InvalidPort)?;
            rest = &after[digits..];
            port
        } else {
            0
        };

        // The remainder is the path and must be rooted
        if !rest.starts_with('/') {
            return Err(UriError::InvalidPath);
        }

        Ok(Uri {
            scheme,
            host: host.to_string(),
            port,
            path: rest.to_string(),
        })
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}", self.scheme.prefix(), self.host)?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod test {
    use super::{Scheme, Uri, UriError};

    /// The full grammar should parse: scheme, host, port and path
    #[test]
    fn test_parse_full() {
        let uri = Uri::parse("coap://node1:5683/zcl/e/1/s3/n").unwrap();
        assert_eq!(uri.scheme, Scheme::Coap);
        assert_eq!(uri.host, "node1");
        assert_eq!(uri.port, 5683);
        assert_eq!(uri.path, "/zcl/e/1/s3/n");
    }

    /// Scheme and port are optional
    #[test]
    fn test_parse_minimal() {
        let uri = Uri::parse("//peer/zcl").unwrap();
        assert_eq!(uri.scheme, Scheme::None);
        assert_eq!(uri.host, "peer");
        assert_eq!(uri.port, 0);
        assert_eq!(uri.path, "/zcl");
    }

    /// Secure scheme variant
    #[test]
    fn test_parse_coaps() {
        let uri = Uri::parse("coaps://peer/n").unwrap();
        assert_eq!(uri.scheme, Scheme::Coaps);
    }

    /// Bracketed IPv6 hosts keep their colons
    #[test]
    fn test_parse_ipv6_host() {
        let uri = Uri::parse("coap://[fe80::1]:1234/zcl/e/1/s1/n").unwrap();
        assert_eq!(uri.host, "[fe80::1]");
        assert_eq!(uri.port, 1234);
        assert_eq!(uri.path, "/zcl/e/1/s1/n");
    }

    /// Malformed inputs are rejected, not silently patched up
    #[test]
    fn test_parse_rejects() {
        assert_eq!(Uri::parse("coap//host/p"), Err(UriError::SchemeColon));
        assert_eq!(Uri::parse("coap:host/p"), Err(UriError::HostMarker));
        assert_eq!(Uri::parse("coap:///p"), Err(UriError::EmptyHost));
        assert_eq!(Uri::parse("coap://host:99999/p"), Err(UriError::InvalidPort));
        assert_eq!(Uri::parse("coap://host:12x/p"), Err(UriError::InvalidPath));
        assert_eq!(Uri::parse("coap://host"), Err(UriError::InvalidPath));
        assert_eq!(Uri::parse("coap://host:80"), Err(UriError::InvalidPath));
    }

    /// Every accepted URI re-encodes and re-parses to an equal record
    #[test]
    fn test_round_trip() {
        for text in [
            "coap://node1/zcl/e/1/s3/n",
            "coaps://node2:5684/zcl/e/2/c102_ab12/n",
            "//localhost/zcl",
            "coap://[ff03::fd]:61616/n",
        ] {
            let uri = Uri::parse(text).unwrap();
            assert_eq!(uri.to_string(), text);
            assert_eq!(Uri::parse(&uri.to_string()).unwrap(), uri);
        }
    }
}
