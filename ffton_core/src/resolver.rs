//! Host name / dotted-quad to IPv4 translation.

use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of '{host}' failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' has no IPv4 address")]
    NoIpv4Address(String),
}

/// Returns true when the text should be treated as a literal address
///
/// Every character must be a digit or a dot. The empty string qualifies.
pub fn is_numeric_literal(text: &str) -> bool {
    text.bytes().all(|b| b == b'.' || b.is_ascii_digit())
}

/// Resolve a host name or dotted quad into an IPv4 address
///
/// Numeric literals never touch the network. A malformed literal such as
/// `300.1.1.1` resolves to `0.0.0.0` instead of failing.
pub async fn resolve(text: &str) -> Result<Ipv4Addr, ResolveError> {
    if is_numeric_literal(text) {
        return Ok(parse_literal(text));
    }

    // Port 0 is ignored, only the address part of the results is used
    let addrs = tokio::net::lookup_host((text, 0))
        .await
        .map_err(|source| ResolveError::Lookup {
            host: text.to_string(),
            source,
        })?;

    let found = addrs
        .map(|addr| addr.ip())
        .find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ResolveError::NoIpv4Address(text.to_string()))?;

    debug!("Resolved '{}' to {}", text, found);
    Ok(found)
}

fn parse_literal(text: &str) -> Ipv4Addr {
    match text.parse::<Ipv4Addr>() {
        Ok(addr) => addr,
        Err(_) => {
            warn!(
                "'{}' is not a valid dotted-quad address, using {}",
                text,
                Ipv4Addr::UNSPECIFIED
            );
            Ipv4Addr::UNSPECIFIED
        }
    }
}
