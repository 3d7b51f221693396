//! Ping options, per-probe replies and aggregated results.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::error::NtxError;
use crate::network::host::Host;
use crate::network::protocol::{IpVersion, Protocol, Status};
use crate::network::{DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT, DEFAULT_TCP_PORT};
use crate::stats;

pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_PAYLOAD_SIZE: usize = 65_500;

#[derive(Debug, Clone, PartialEq)]
pub struct PingOptions {
    pub protocol: Protocol,
    /// Number of probes; `0` keeps probing until cancelled.
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    /// ICMP payload size in bytes.
    pub size: usize,
    pub ttl: u8,
    pub port: Option<u16>,
    pub ip_version: IpVersion,
    pub http_method: String,
    pub http_path: String,
    /// IPv4 type-of-service byte, `0` leaves the system default.
    pub tos: u8,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Icmp,
            count: 4,
            interval: Duration::from_secs(1),
            timeout: DEFAULT_PING_TIMEOUT,
            size: 64,
            ttl: 64,
            port: None,
            ip_version: IpVersion::Any,
            http_method: "GET".to_string(),
            http_path: "/".to_string(),
            tos: 0,
        }
    }
}

impl PingOptions {
    /// Fills `port` with the protocol default when unset.
    pub fn ensure_port(&mut self, target: &str) {
        if self.port.is_none() {
            self.port = default_port(self.protocol, target);
        }
    }

    pub fn validate(&self) -> Result<(), NtxError> {
        if self.timeout.is_zero() {
            return Err(NtxError::InvalidOption {
                field: "timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.ttl == 0 {
            return Err(NtxError::InvalidOption {
                field: "ttl",
                reason: "must be between 1 and 255".to_string(),
            });
        }
        if self.size > MAX_PAYLOAD_SIZE {
            return Err(NtxError::InvalidOption {
                field: "size",
                reason: format!("must not exceed {MAX_PAYLOAD_SIZE} bytes"),
            });
        }
        if self.port == Some(0) {
            return Err(NtxError::InvalidPort("0".to_string()));
        }
        Ok(())
    }
}

/// Default port for a protocol, `None` for ICMP.
pub fn default_port(protocol: Protocol, target: &str) -> Option<u16> {
    match protocol {
        Protocol::Icmp => None,
        Protocol::Tcp => Some(DEFAULT_TCP_PORT),
        Protocol::Https => Some(DEFAULT_HTTPS_PORT),
        Protocol::Http if target.starts_with("https://") => Some(DEFAULT_HTTPS_PORT),
        Protocol::Http => Some(DEFAULT_HTTP_PORT),
    }
}

/// Outcome of a single probe. Never modified once handed to a caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingReply {
    pub seq: u32,
    pub from: String,
    pub bytes: usize,
    /// Requested outgoing TTL.
    pub ttl: u8,
    /// Whether `ttl` was actually applied to the outgoing packet.
    pub ttl_enforced: bool,
    pub rtt: Duration,
    pub time: SystemTime,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingReply {
    pub fn new(seq: u32, from: impl Into<String>) -> Self {
        Self {
            seq,
            from: from.into(),
            bytes: 0,
            ttl: 0,
            ttl_enforced: false,
            rtt: Duration::ZERO,
            time: SystemTime::now(),
            status: Status::Unknown,
            error: None,
        }
    }

    pub fn success(mut self, rtt: Duration, bytes: usize) -> Self {
        self.status = Status::Success;
        self.rtt = rtt;
        self.bytes = bytes;
        self
    }

    pub fn failure(mut self, error: impl ToString) -> Self {
        self.status = Status::Failure;
        self.error = Some(error.to_string());
        self
    }

    pub fn timeout(mut self, waited: Duration) -> Self {
        self.status = Status::Timeout;
        self.rtt = waited;
        self
    }

    pub fn with_ttl(mut self, ttl: u8, enforced: bool) -> Self {
        self.ttl = ttl;
        self.ttl_enforced = enforced;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Statistics {
    pub sent: usize,
    pub received: usize,
    pub loss: usize,
    /// Percentage in `0..=100`.
    pub loss_rate: f64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub avg_rtt: Duration,
    pub stddev_rtt: Duration,
}

impl Statistics {
    /// Derives every counter from the replies themselves, so
    /// `sent == replies.len()` and `sent == received + loss` always hold.
    pub fn from_replies(replies: &[PingReply]) -> Self {
        let rtts: Vec<Duration> = replies
            .iter()
            .filter(|reply| reply.is_success())
            .map(|reply| reply.rtt)
            .collect();

        let sent = replies.len();
        let received = rtts.len();
        let loss = sent - received;
        let loss_rate = if sent > 0 {
            loss as f64 / sent as f64 * 100.0
        } else {
            0.0
        };

        let (min_rtt, max_rtt, avg_rtt, stddev_rtt) = stats::compute_rtt_stats(&rtts);

        Self {
            sent,
            received,
            loss,
            loss_rate,
            min_rtt,
            max_rtt,
            avg_rtt,
            stddev_rtt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionContext {
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl ExecutionContext {
    pub fn start(hostname: Option<String>) -> Self {
        Self {
            start_time: SystemTime::now(),
            end_time: None,
            duration: Duration::ZERO,
            hostname,
        }
    }

    pub fn finish(&mut self) {
        let end = SystemTime::now();
        self.duration = end.duration_since(self.start_time).unwrap_or_default();
        self.end_time = Some(end);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    pub target: Host,
    pub protocol: Protocol,
    pub replies: Vec<PingReply>,
    pub statistics: Statistics,
    pub context: ExecutionContext,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingResult {
    pub fn new(target: Host, protocol: Protocol, context: ExecutionContext) -> Self {
        Self {
            target,
            protocol,
            replies: Vec::new(),
            statistics: Statistics::default(),
            context,
            status: Status::Unknown,
            error: None,
        }
    }

    pub fn add_reply(&mut self, reply: PingReply) {
        self.replies.push(reply);
    }

    /// Closes the run: stamps the end time, derives the statistics from the
    /// replies and settles the aggregate status.
    ///
    /// A cancelled run is a failure. Otherwise nothing received is a failure,
    /// partial reception a timeout and full reception a success.
    pub fn finalize(&mut self, cancelled: bool) {
        self.context.finish();
        self.statistics = Statistics::from_replies(&self.replies);

        if cancelled {
            self.status = Status::Failure;
            self.error = Some(NtxError::Cancelled.to_string());
            return;
        }

        let Statistics { sent, received, .. } = self.statistics;
        self.status = if received == 0 {
            if self.error.is_none() {
                self.error = Some(NtxError::NoResponse.to_string());
            }
            Status::Failure
        } else if received < sent {
            Status::Timeout
        } else {
            Status::Success
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
