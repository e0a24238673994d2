//! SHARP mailbox addresses
//!
//! An address names a mailbox on a SHARP host: `user#domain` or `user#domain:port`.
//! The domain is kept exactly as supplied; no case folding is applied anywhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the username and the host part
pub const ADDRESS_SEPARATOR: char = '#';

/// Address parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid SHARP address format: missing '#' in {0:?}")]
    MissingSeparator(String),
    #[error("Invalid SHARP address format: empty username")]
    EmptyUsername,
    #[error("Invalid SHARP address format: empty domain")]
    EmptyDomain,
    #[error("Invalid SHARP address format: bad port {0:?}")]
    InvalidPort(String),
    #[error("Invalid SHARP address format: whitespace in {0:?}")]
    Whitespace(String),
}

/// A `user#domain[:port]` mailbox identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub username: String,
    pub domain: String,
    pub port: Option<u16>,
}

impl Address {
    /// Create an address without an explicit port
    pub fn new(username: &str, domain: &str) -> Self {
        Self {
            username: username.to_string(),
            domain: domain.to_string(),
            port: None,
        }
    }

    /// Create an address with an explicit port
    pub fn with_port(username: &str, domain: &str, port: u16) -> Self {
        Self {
            username: username.to_string(),
            domain: domain.to_string(),
            port: Some(port),
        }
    }

    /// Parse `user#domain[:port]`.
    ///
    /// The last `#` splits username from host, so usernames may themselves contain `#`.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        if raw.chars().any(char::is_whitespace) {
            return Err(AddressError::Whitespace(raw.to_string()));
        }

        let (username, host) = raw
            .rsplit_once(ADDRESS_SEPARATOR)
            .ok_or_else(|| AddressError::MissingSeparator(raw.to_string()))?;

        if username.is_empty() {
            return Err(AddressError::EmptyUsername);
        }

        let (domain, port) = match host.rsplit_once(':') {
            Some((domain, port)) => (domain, Some(parse_port(port)?)),
            None => (host, None),
        };

        if domain.is_empty() {
            return Err(AddressError::EmptyDomain);
        }

        Ok(Self {
            username: username.to_string(),
            domain: domain.to_string(),
            port,
        })
    }

    /// The `domain[:port]` part, as compared against the local domain
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.domain, port),
            None => self.domain.clone(),
        }
    }

    /// Whether this mailbox lives on the host configured as `local_domain`.
    ///
    /// Exact, case-sensitive comparison of `domain[:port]`; no default port is implied.
    /// Both the inbound state machine and the outbound paths go through here.
    pub fn is_local_to(&self, local_domain: &str) -> bool {
        self.host() == local_domain
    }
}

fn parse_port(raw: &str) -> Result<u16, AddressError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidPort(raw.to_string()));
    }

    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(AddressError::InvalidPort(raw.to_string())),
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.username, ADDRESS_SEPARATOR, self.host())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
