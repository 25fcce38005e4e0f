// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// Network utility functions

use std::net::{IpAddr, SocketAddr};

use tracing::debug;

use crate::error::{Error, Result};

/// Port cosignd listens on unless told otherwise
pub const DEFAULT_DAEMON_PORT: u16 = 6663;

/// Join a host and port, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}

/// Split `host:port` or `[v6]:port`. Returns None for a bare host or IPv6 literal.
pub fn split_host_port(value: &str) -> Option<(&str, u16)> {
    if let Some(rest) = value.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return Some((host, port.parse().ok()?));
    }

    let (host, port) = value.rsplit_once(':')?;
    // More than one colon means an unbracketed IPv6 address
    if host.is_empty() || host.contains(':') {
        return None;
    }
    Some((host, port.parse().ok()?))
}

/// Resolve the configured daemon host into every distinct address it names
///
/// An explicit `port` wins; otherwise a port embedded in `host` is used, and
/// failing that the default cosignd port.
pub async fn resolve_daemon_addresses(host: &str, port: Option<u16>) -> Result<Vec<SocketAddr>> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::Config("daemon host is empty".to_string()));
    }

    let target = match (port, split_host_port(host)) {
        (Some(port), Some((bare, _))) => format_host_port(bare, port),
        (Some(port), None) => format_host_port(host.trim_matches(|c| c == '[' || c == ']'), port),
        (None, Some(_)) => host.to_string(),
        (None, None) => format_host_port(
            host.trim_matches(|c| c == '[' || c == ']'),
            DEFAULT_DAEMON_PORT,
        ),
    };

    let resolved = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| Error::Resolve {
            host: target.clone(),
            reason: e.to_string(),
        })?;

    let mut addresses: Vec<SocketAddr> = Vec::new();
    for address in resolved {
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    if addresses.is_empty() {
        return Err(Error::Resolve {
            host: target,
            reason: "no addresses found".to_string(),
        });
    }

    debug!("Resolved {} to {} daemon address(es)", target, addresses.len());
    Ok(addresses)
}
