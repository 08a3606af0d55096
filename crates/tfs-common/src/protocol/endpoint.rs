use std::fmt;
use std::str::FromStr;

use super::error::TfsError;

/// Port used when an address omits one.
pub const DEFAULT_PORT: u16 = 80;

/// A `host:port` pair addressing a root directory server or a storage agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Absolute `http://` URL for `path` on this endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self, path)
    }

    /// Parses one agent line of a discovery listing.
    ///
    /// Only dotted-quad addresses (`digits.digits.digits.digits[:port]`)
    /// qualify; anything else yields `None`.
    pub fn parse_agent(line: &str) -> Option<Self> {
        let (host, port) = match line.split_once(':') {
            Some((host, port)) => {
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                (host, port.parse::<u16>().ok()?)
            }
            None => (line, DEFAULT_PORT),
        };

        let mut groups = 0;
        for group in host.split('.') {
            if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            groups += 1;
        }
        if groups != 4 {
            return None;
        }

        Some(Self::new(host, port))
    }
}

impl FromStr for Endpoint {
    type Err = TfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    TfsError::InvalidArgument(format!("invalid port in '{}': {}", s, e))
                })?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(TfsError::InvalidArgument(format!(
                "missing host in address '{}'",
                s
            )));
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
