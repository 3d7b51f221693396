//! Traceroute options and the hop-by-hop result model.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;

use crate::error::NtxError;
use crate::network::DEFAULT_TRACEROUTE_PORT;
use crate::network::host::Host;
use crate::network::protocol::{IpVersion, Protocol, Status};
use crate::ping::ExecutionContext;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceOptions {
    pub protocol: Protocol,
    pub max_hops: u8,
    /// Per-query timeout.
    pub timeout: Duration,
    pub queries: u8,
    pub port: u16,
    pub packet_size: usize,
    pub ip_version: IpVersion,
    pub first_ttl: u8,
    /// Consecutive silent hops after which the trace is abandoned, `0` never abandons.
    pub silent_hop_limit: u8,
    pub resolve_hostnames: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Icmp,
            max_hops: 30,
            timeout: Duration::from_secs(3),
            queries: 3,
            port: DEFAULT_TRACEROUTE_PORT,
            packet_size: 60,
            ip_version: IpVersion::Any,
            first_ttl: 1,
            silent_hop_limit: 5,
            resolve_hostnames: true,
        }
    }
}

impl TraceOptions {
    pub fn validate(&self) -> Result<(), NtxError> {
        let invalid = |field, reason: &str| {
            Err(NtxError::InvalidOption {
                field,
                reason: reason.to_string(),
            })
        };

        if self.timeout.is_zero() {
            return invalid("timeout", "must be greater than zero");
        }
        if self.queries == 0 {
            return invalid("queries", "at least one query per hop is required");
        }
        if self.first_ttl == 0 {
            return invalid("first_ttl", "must be at least 1");
        }
        if self.first_ttl > self.max_hops {
            return invalid("first_ttl", "must not exceed max_hops");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceProbe {
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    pub rtt: Duration,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceProbe {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceHop {
    pub ttl: u8,
    pub probes: Vec<TraceProbe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub is_destination: bool,
}

impl TraceHop {
    pub fn new(ttl: u8) -> Self {
        Self {
            ttl,
            probes: Vec::new(),
            ip: None,
            hostname: None,
            is_destination: false,
        }
    }

    /// Records a probe. The hop address is taken from the first successful one.
    pub fn add_probe(&mut self, probe: TraceProbe) {
        if self.ip.is_none() && probe.is_success() {
            self.ip = probe.ip;
        }
        self.probes.push(probe);
    }

    pub fn success_count(&self) -> usize {
        self.probes.iter().filter(|p| p.is_success()).count()
    }

    pub fn is_silent(&self) -> bool {
        self.success_count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceResult {
    pub target: Host,
    pub protocol: Protocol,
    pub hops: Vec<TraceHop>,
    pub reached_destination: bool,
    pub hop_count: usize,
    pub context: ExecutionContext,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the per-hop TTL actually reached the wire.
    pub ttl_enforced: bool,
}

impl TraceResult {
    pub fn new(target: Host, protocol: Protocol, context: ExecutionContext) -> Self {
        Self {
            target,
            protocol,
            hops: Vec::new(),
            reached_destination: false,
            hop_count: 0,
            context,
            status: Status::Unknown,
            error: None,
            ttl_enforced: false,
        }
    }

    /// Appends a hop. Returns `false` and drops the hop once the
    /// destination has already been reached.
    pub fn add_hop(&mut self, hop: TraceHop) -> bool {
        if self.reached_destination {
            return false;
        }
        self.reached_destination = hop.is_destination;
        self.hops.push(hop);
        self.hop_count = self.hops.len();
        true
    }

    pub fn last_hop(&self) -> Option<&TraceHop> {
        self.hops.last()
    }

    /// True once the trace has advanced past `first_ttl + limit` and the
    /// last `limit` hops all stayed silent.
    pub fn should_abandon(&self, first_ttl: u8, limit: u8) -> bool {
        if limit == 0 {
            return false;
        }
        let Some(last) = self.last_hop() else {
            return false;
        };
        let limit = limit as usize;
        if (last.ttl as usize) < first_ttl as usize + limit || self.hops.len() < limit {
            return false;
        }
        self.hops[self.hops.len() - limit..]
            .iter()
            .all(TraceHop::is_silent)
    }

    pub fn finalize(&mut self, cancelled: bool) {
        self.context.finish();
        self.hop_count = self.hops.len();

        if cancelled {
            self.status = Status::Failure;
            self.error = Some(NtxError::Cancelled.to_string());
            return;
        }

        let answered = self.hops.iter().any(|hop| !hop.is_silent());
        self.status = if self.reached_destination {
            Status::Success
        } else if !answered {
            if self.error.is_none() {
                self.error = Some(NtxError::NoResponse.to_string());
            }
            Status::Failure
        } else {
            Status::Timeout
        };
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
