//! Network endpoints in `[user@]host[:port]` form.
//!
//! Parsing is deliberately lenient about the port: a bare hostname is valid
//! and an unparsable port segment leaves the port at `0`, so callers can
//! apply their own default afterwards (the SSH server falls back to 22, the
//! local listener to an ephemeral port).

use std::fmt;

use super::error::TunnelError;

/// A host/port/user triple describing one side of a network hop.
///
/// The user is only consulted for authentication and never appears in the
/// dialable rendering produced by [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    user: Option<String>,
}

impl Endpoint {
    /// Build an endpoint from already split parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
        }
    }

    /// Parse `[user@]host[:port]`.
    ///
    /// The user is everything before the first `@`. Bracketed IPv6 literals
    /// (`[2001:db8::1]:22`) are unwrapped; an unbracketed literal with
    /// several colons is taken as a host without a port.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::MalformedEndpoint`] when the input is empty, the
    /// host or user is empty, or a bracket is left unbalanced.
    pub fn parse(raw: &str) -> Result<Self, TunnelError> {
        let malformed = |reason| TunnelError::MalformedEndpoint {
            input: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(malformed("empty address"));
        }

        let (user, rest) = match raw.split_once('@') {
            Some(("", _)) => return Err(malformed("empty user before '@'")),
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, raw),
        };

        let (host, port) = split_host_port(rest).map_err(malformed)?;
        if host.is_empty() {
            return Err(malformed("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            user,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port, `0` when unspecified.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Replace the port, keeping host and user.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Fill in `port` only when none was given.
    pub fn with_default_port(self, port: u16) -> Self {
        if self.port == 0 {
            self.with_port(port)
        } else {
            self
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Split `host[:port]` with awareness of bracketed address literals.
fn split_host_port(s: &str) -> Result<(&str, u16), &'static str> {
    if let Some(inner) = s.strip_prefix('[') {
        let (host, tail) = inner.split_once(']').ok_or("unterminated bracket")?;
        if host.contains('[') || tail.contains(']') || tail.contains('[') {
            return Err("unbalanced bracket");
        }
        return match tail {
            "" => Ok((host, 0)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((host, parse_port(port))),
                None => Err("unexpected text after bracketed host"),
            },
        };
    }

    if s.contains('[') || s.contains(']') {
        return Err("unbalanced bracket");
    }

    match s.matches(':').count() {
        0 => Ok((s, 0)),
        1 => {
            let (host, port) = s.split_once(':').ok_or("missing port separator")?;
            Ok((host, parse_port(port)))
        }
        // Unbracketed IPv6 literal: no port can be carried.
        _ => Ok((s, 0)),
    }
}

fn parse_port(segment: &str) -> u16 {
    segment.parse::<u16>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parsing {
        use super::*;

        #[test]
        fn test_host_with_port() {
            let endpoint = Endpoint::parse("localhost:9000").unwrap();
            assert_eq!(endpoint.host(), "localhost");
            assert_eq!(endpoint.port(), 9000);
            assert_eq!(endpoint.user(), None);
        }

        #[test]
        fn test_user_without_port() {
            let endpoint = Endpoint::parse("ec2-user@jumpbox.us-east-1.mydomain.com").unwrap();
            assert_eq!(endpoint.host(), "jumpbox.us-east-1.mydomain.com");
            assert_eq!(endpoint.port(), 0);
            assert_eq!(endpoint.user(), Some("ec2-user"));
        }

        #[test]
        fn test_long_hostname_with_port() {
            let endpoint =
                Endpoint::parse("dqrsdfdssdfx.us-east-1.redshift.amazonaws.com:5439").unwrap();
            assert_eq!(
                endpoint.host(),
                "dqrsdfdssdfx.us-east-1.redshift.amazonaws.com"
            );
            assert_eq!(endpoint.port(), 5439);
        }

        #[test]
        fn test_ipv4_with_user() {
            let endpoint = Endpoint::parse("admin@1.2.3.4:22").unwrap();
            assert_eq!(endpoint.host(), "1.2.3.4");
            assert_eq!(endpoint.port(), 22);
            assert_eq!(endpoint.user(), Some("admin"));
        }

        #[test]
        fn test_bracketed_ipv6_with_user() {
            let endpoint = Endpoint::parse("admin@[2001:db8:1::ab9:C0A8:102]:22").unwrap();
            assert_eq!(endpoint.host(), "2001:db8:1::ab9:C0A8:102");
            assert_eq!(endpoint.port(), 22);
            assert_eq!(endpoint.user(), Some("admin"));
        }

        #[test]
        fn test_bracketed_ipv6_without_port() {
            let endpoint = Endpoint::parse("[::1]").unwrap();
            assert_eq!(endpoint.host(), "::1");
            assert_eq!(endpoint.port(), 0);
        }

        #[test]
        fn test_unbracketed_ipv6_is_host_only() {
            let endpoint = Endpoint::parse("2001:db8::1").unwrap();
            assert_eq!(endpoint.host(), "2001:db8::1");
            assert_eq!(endpoint.port(), 0);
        }

        #[test]
        fn test_user_split_on_first_at() {
            let endpoint = Endpoint::parse("ops@corp@bastion:2222").unwrap();
            assert_eq!(endpoint.user(), Some("ops"));
            assert_eq!(endpoint.host(), "corp@bastion");
            assert_eq!(endpoint.port(), 2222);
        }
    }

    mod lenient_port {
        use super::*;

        #[test]
        fn test_non_numeric_port_is_zero() {
            let endpoint = Endpoint::parse("example.com:ssh").unwrap();
            assert_eq!(endpoint.host(), "example.com");
            assert_eq!(endpoint.port(), 0);
        }

        #[test]
        fn test_out_of_range_port_is_zero() {
            let endpoint = Endpoint::parse("example.com:99999").unwrap();
            assert_eq!(endpoint.port(), 0);
        }

        #[test]
        fn test_empty_port_is_zero() {
            let endpoint = Endpoint::parse("example.com:").unwrap();
            assert_eq!(endpoint.host(), "example.com");
            assert_eq!(endpoint.port(), 0);
        }

        #[test]
        fn test_default_port_only_fills_zero() {
            let bare = Endpoint::parse("bastion").unwrap().with_default_port(22);
            assert_eq!(bare.port(), 22);

            let explicit = Endpoint::parse("bastion:2222").unwrap().with_default_port(22);
            assert_eq!(explicit.port(), 2222);
        }
    }

    mod malformed {
        use super::*;

        fn assert_malformed(input: &str) {
            match Endpoint::parse(input) {
                Err(TunnelError::MalformedEndpoint { input: got, .. }) => assert_eq!(got, input),
                other => panic!("expected MalformedEndpoint for {input:?}, got {other:?}"),
            }
        }

        #[test]
        fn test_empty_input() {
            assert_malformed("");
        }

        #[test]
        fn test_missing_host() {
            assert_malformed(":22");
            assert_malformed("admin@");
            assert_malformed("[]:22");
        }

        #[test]
        fn test_empty_user() {
            assert_malformed("@bastion:22");
        }

        #[test]
        fn test_unbalanced_brackets() {
            assert_malformed("[::1");
            assert_malformed("::1]:22");
            assert_malformed("[::1]x");
        }
    }

    mod rendering {
        use super::*;

        #[test]
        fn test_render_omits_user() {
            let endpoint = Endpoint::parse("admin@1.2.3.4:22").unwrap();
            assert_eq!(endpoint.to_string(), "1.2.3.4:22");
        }

        #[test]
        fn test_round_trip_without_user() {
            for (input, rendered) in [
                ("localhost:9000", "localhost:9000"),
                ("ec2-user@jumpbox.example.com:22", "jumpbox.example.com:22"),
                ("admin@[2001:db8:1::ab9:C0A8:102]:22", "[2001:db8:1::ab9:C0A8:102]:22"),
                ("[::1]:8080", "[::1]:8080"),
            ] {
                let endpoint = Endpoint::parse(input).unwrap();
                assert_eq!(endpoint.to_string(), rendered);
                assert_eq!(Endpoint::parse(rendered).unwrap().to_string(), rendered);
            }
        }

        #[test]
        fn test_unspecified_port_renders_zero() {
            let endpoint = Endpoint::parse("bastion").unwrap();
            assert_eq!(endpoint.to_string(), "bastion:0");
        }
    }
}
