use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lowest port a session may use on either side
pub const MIN_PORT: u16 = 1024;

/// Highest port a session may use on either side
pub const MAX_PORT: u16 = 65535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("'{0}' is not a port number")]
    NotANumber(String),

    #[error("Wrong port number {0}. The port number must be within 1024 to 65535 (inclusive).")]
    OutOfRange(u64),
}

/// A user-range port, validated before any socket is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(u16);

impl Port {
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for Port {
    type Error = PortError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value < MIN_PORT {
            return Err(PortError::OutOfRange(value.into()));
        }
        Ok(Self(value))
    }
}

impl FromStr for Port {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PortError::NotANumber(s.to_string()));
        }
        // Overlong digit strings are out of range rather than malformed
        let value: u64 = trimmed.parse().unwrap_or(u64::MAX);
        if value > u64::from(MAX_PORT) {
            return Err(PortError::OutOfRange(value));
        }
        Port::try_from(value as u16)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One side of a connection attempt: a host name or dotted quad plus a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Port,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: Port) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_rejects_invalid_strings() {
        assert_eq!("80".parse::<Port>(), Err(PortError::OutOfRange(80)));
        assert_eq!("70000".parse::<Port>(), Err(PortError::OutOfRange(70000)));
        assert!(matches!("abc".parse::<Port>(), Err(PortError::NotANumber(_))));
        assert!(matches!("".parse::<Port>(), Err(PortError::NotANumber(_))));
        assert!(matches!("-1".parse::<Port>(), Err(PortError::NotANumber(_))));
        assert!(matches!("99999999999999999999999".parse::<Port>(), Err(PortError::OutOfRange(_))));
    }

    #[test]
    fn test_port_accepts_boundaries() {
        assert_eq!("1024".parse::<Port>().unwrap().get(), 1024);
        assert_eq!("65535".parse::<Port>().unwrap().get(), 65535);
        assert_eq!(" 9000 ".parse::<Port>().unwrap().get(), 9000);
    }

    #[test]
    fn test_port_try_from_u16() {
        assert!(Port::try_from(1023).is_err());
        assert_eq!(Port::try_from(1024).unwrap().to_string(), "1024");
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("example.org", "4000".parse().unwrap());
        assert_eq!(endpoint.to_string(), "example.org:4000");
    }
}
