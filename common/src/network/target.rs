//! # Probe Target Model
//!
//! Parses what the user typed into a host and an optional port.
//!
//! Accepted forms:
//! * A hostname or IPv4 address (`example.com`, `10.0.0.1`).
//! * Any of the above with a port (`example.com:443`).
//! * A bare IPv6 address (`::1`, never carries a port).
//! * A bracketed IPv6 address, optionally with a port (`[::1]`, `[::1]:22`).

use std::str::FromStr;

use crate::error::NtxError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
}

impl Target {
    /// The explicit port, else `default`.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl FromStr for Target {
    type Err = NtxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NtxError::InvalidHost(s.to_string()));
        }

        if let Some(target) = parse_bracketed(s)? {
            return Ok(target);
        }

        if let Some(target) = parse_host_port(s)? {
            return Ok(target);
        }

        Ok(Target {
            host: s.to_string(),
            port: None,
        })
    }
}

/// Parses `[v6]` and `[v6]:port`.
fn parse_bracketed(s: &str) -> Result<Option<Target>, NtxError> {
    let Some(inner) = s.strip_prefix('[') else {
        return Ok(None);
    };

    let (host, rest) = inner
        .split_once(']')
        .ok_or_else(|| NtxError::InvalidHost(s.to_string()))?;

    if host.is_empty() {
        return Err(NtxError::InvalidHost(s.to_string()));
    }

    let port = match rest {
        "" => None,
        _ => {
            let port_str = rest
                .strip_prefix(':')
                .ok_or_else(|| NtxError::InvalidHost(s.to_string()))?;
            parse_port(port_str)?
        }
    };

    Ok(Some(Target {
        host: host.to_string(),
        port,
    }))
}

/// Parses `host:port`. Anything with more than one colon is a bare IPv6
/// address and is left alone.
fn parse_host_port(s: &str) -> Result<Option<Target>, NtxError> {
    if s.matches(':').count() != 1 {
        return Ok(None);
    }

    let Some((host, port_str)) = s.split_once(':') else {
        return Ok(None);
    };

    if host.is_empty() {
        return Err(NtxError::InvalidHost(s.to_string()));
    }

    Ok(Some(Target {
        host: host.to_string(),
        port: parse_port(port_str)?,
    }))
}

/// An empty port means "use the default"; anything else must be 1-65535.
fn parse_port(port_str: &str) -> Result<Option<u16>, NtxError> {
    if port_str.is_empty() {
        return Ok(None);
    }

    match port_str.parse::<u16>() {
        Ok(0) | Err(_) => Err(NtxError::InvalidPort(port_str.to_string())),
        Ok(port) => Ok(Some(port)),
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
