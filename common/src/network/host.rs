use std::net::IpAddr;

use serde::Serialize;

use super::protocol::IpVersion;

/// A resolved probing target.
///
/// Produced by the resolver and never mutated afterwards by the engine.
/// Callers receive owned copies, so editing one never leaks into the
/// resolver's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub hostname: String,
    pub ip: IpAddr,
    pub ip_version: IpVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Host {
    pub fn new(hostname: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            ip,
            ip_version: IpVersion::of(&ip),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}
