//! Error taxonomy shared by the probing engine.
//!
//! Only failures that abort an operation are errors. A lost or refused
//! probe is recorded on its `PingReply`/`TraceProbe` instead.

use std::io;

use thiserror::Error;

use crate::network::protocol::IpVersion;

#[derive(Debug, Error)]
pub enum NtxError {
    #[error("invalid host: {0:?}")]
    InvalidHost(String),

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("dns resolution failed for {host}: {source}")]
    DnsResolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no {version} address available for {host}")]
    NoAddress { host: String, version: IpVersion },

    #[error("{op} {resource}: permission denied ({hint})")]
    Permission {
        op: &'static str,
        resource: String,
        hint: String,
    },

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    #[error("http client: {0}")]
    Http(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("resource closed")]
    Closed,

    #[error("no icmp transport available for {0}")]
    TransportUnavailable(IpVersion),

    #[error("no response from target")]
    NoResponse,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NtxError {
    /// Builds a [`NtxError::Permission`] carrying the remediation hint of the
    /// current operating system.
    pub fn permission(op: &'static str, resource: impl Into<String>) -> Self {
        Self::Permission {
            op,
            resource: resource.into(),
            hint: permission_hint().to_string(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Permission { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

/// What the user can do to obtain ICMP sockets on this platform.
pub fn permission_hint() -> &'static str {
    if cfg!(target_os = "windows") {
        "run the terminal as Administrator"
    } else if cfg!(target_os = "macos") {
        "run with sudo"
    } else {
        "run with sudo, grant the capability with `setcap cap_net_raw+ep <binary>` \
         or allow unprivileged ping via `sysctl -w net.ipv4.ping_group_range='0 2147483647'`"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_are_classified() {
        let err = NtxError::permission("icmp ping", "raw socket");
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("permission denied"));

        let io_err = NtxError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(io_err.is_permission_denied());
    }

    #[test]
    fn other_errors_are_not_permission_errors() {
        assert!(!NtxError::Cancelled.is_permission_denied());
        assert!(!NtxError::InvalidHost(String::new()).is_permission_denied());
        let refused = NtxError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!refused.is_permission_denied());
    }
}
