use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host and port a TCP listener binds to.
///
/// Deserialises from either a `"host:port"` string, as supplied through
/// environment variables, or a `{ host, port }` table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "ListenAddressRepr")]
pub struct ListenAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port; `0` asks the OS for an ephemeral port.
    pub port: u16,
}

impl ListenAddress {
    /// Builds a listen address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListenAddressRepr {
    Text(String),
    Table { host: String, port: u16 },
}

impl TryFrom<ListenAddressRepr> for ListenAddress {
    type Error = ListenParseError;

    fn try_from(repr: ListenAddressRepr) -> Result<Self, Self::Error> {
        match repr {
            ListenAddressRepr::Text(text) => text.parse(),
            ListenAddressRepr::Table { host, port } if host.is_empty() => {
                Err(ListenParseError::MissingHost(format!(":{port}")))
            }
            ListenAddressRepr::Table { host, port } => Ok(Self::new(host, port)),
        }
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(formatter, "[{}]:{}", self.host, self.port)
        } else {
            write!(formatter, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ListenAddress {
    type Err = ListenParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| ListenParseError::MissingPort(input.to_owned()))?;
        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        if bare_host.is_empty() {
            return Err(ListenParseError::MissingHost(input.to_owned()));
        }
        let number = port
            .parse::<u16>()
            .map_err(|_| ListenParseError::InvalidPort(input.to_owned()))?;
        Ok(Self::new(bare_host, number))
    }
}

/// Errors encountered while parsing a [`ListenAddress`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenParseError {
    /// No `:port` suffix was present.
    #[error("missing port in '{0}'")]
    MissingPort(String),
    /// The host part was empty.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// The port was not a number between 0 and 65535.
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("127.0.0.1:9000", "127.0.0.1", 9000)]
    #[case("[::1]:9010", "::1", 9010)]
    #[case("localhost:0", "localhost", 0)]
    fn parses_host_and_port(#[case] raw: &str, #[case] host: &str, #[case] port: u16) {
        let address: ListenAddress = raw.parse().expect("address should parse");
        assert_eq!(address, ListenAddress::new(host, port));
    }

    #[rstest]
    #[case("localhost", ListenParseError::MissingPort("localhost".to_owned()))]
    #[case(":9000", ListenParseError::MissingHost(":9000".to_owned()))]
    #[case("localhost:http", ListenParseError::InvalidPort("localhost:http".to_owned()))]
    fn rejects_malformed_addresses(#[case] raw: &str, #[case] expected: ListenParseError) {
        assert_eq!(raw.parse::<ListenAddress>(), Err(expected));
    }

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        address: ListenAddress,
    }

    #[rstest]
    #[case("address = \"127.0.0.1:9100\"\n")]
    #[case("[address]\nhost = \"127.0.0.1\"\nport = 9100\n")]
    fn deserialises_from_text_or_table(#[case] raw: &str) {
        let wrapper: Wrapper = toml::from_str(raw).expect("address should deserialise");
        assert_eq!(wrapper.address, ListenAddress::new("127.0.0.1", 9100));
    }

    #[test]
    fn rejects_text_without_port() {
        assert!(toml::from_str::<Wrapper>("address = \"localhost\"\n").is_err());
    }

    #[test]
    fn displays_ipv6_hosts_in_brackets() {
        assert_eq!(ListenAddress::new("::1", 9000).to_string(), "[::1]:9000");
    }
}
