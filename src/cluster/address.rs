use std::fmt::Display;
use std::str::FromStr;

use crate::error::AddressError;

/// Port a scheduler listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8786;

const SCHEME: &str = "tcp://";

/// A parsed connection string, `host:port` with an optional `tcp://` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// `host` on [`DEFAULT_PORT`].
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let rest = match trimmed.get(..SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &trimmed[SCHEME.len()..],
            _ => trimmed,
        };

        let Some((host, port)) = rest.rsplit_once(':') else {
            return Err(AddressError::MissingPort(s.to_string()));
        };

        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }

        let bracketed = host.starts_with('[') && host.ends_with(']');
        if !bracketed && host.contains([':', '/', '[', ']']) {
            return Err(AddressError::InvalidHost(s.to_string()));
        }

        if port.is_empty() {
            return Err(AddressError::MissingPort(s.to_string()));
        }

        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(AddressError::InvalidPort(s.to_string())),
            Ok(port) => Ok(Address::new(host, port)),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
