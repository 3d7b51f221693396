use std::net::IpAddr;
use std::time::Duration;

use crate::terminal::colors;
use colored::*;
use ntx_common::network::protocol::Status;
use ntx_common::ping::{PingReply, Statistics};
use ntx_common::trace::TraceHop;

pub fn millis(d: Duration) -> String {
    format!("{:.3} ms", d.as_secs_f64() * 1000.0)
}

pub fn status_color(status: Status) -> Color {
    match status {
        Status::Success => colors::SUCCESS,
        Status::Timeout => colors::TIMEOUT,
        Status::Failure | Status::Unknown => colors::FAILURE,
    }
}

pub fn ip(ip: &IpAddr) -> ColoredString {
    match ip {
        IpAddr::V4(v4) => v4.to_string().color(colors::IPV4_ADDR),
        IpAddr::V6(v6) => v6.to_string().color(colors::IPV6_ADDR),
    }
}

pub fn reply_line(reply: &PingReply) -> String {
    let ttl = if reply.ttl == 0 {
        String::new()
    } else if reply.ttl_enforced {
        format!(" ttl={}", reply.ttl)
    } else {
        format!(" ttl={}?", reply.ttl)
    };

    match reply.status {
        Status::Success => format!(
            "{} bytes from {}: seq={}{} time={}",
            reply.bytes,
            reply.from,
            reply.seq,
            ttl,
            millis(reply.rtt)
        ),
        Status::Timeout => format!("seq={} timeout after {}", reply.seq, millis(reply.rtt)),
        Status::Failure | Status::Unknown => format!(
            "seq={} {}: {}",
            reply.seq,
            reply.from,
            reply.error.as_deref().unwrap_or("failed")
        ),
    }
}

pub fn loss_line(stats: &Statistics) -> String {
    format!(
        "{} sent, {} received, {:.1}% loss",
        stats.sent, stats.received, stats.loss_rate
    )
}

pub fn rtt_line(stats: &Statistics) -> String {
    if stats.received == 0 {
        return "-".to_string();
    }
    format!(
        "{:.3}/{:.3}/{:.3}/{:.3} ms",
        stats.min_rtt.as_secs_f64() * 1000.0,
        stats.avg_rtt.as_secs_f64() * 1000.0,
        stats.max_rtt.as_secs_f64() * 1000.0,
        stats.stddev_rtt.as_secs_f64() * 1000.0
    )
}

/// ` 3  core1.example.net (10.0.0.1)  1.204 ms  *  1.330 ms`
pub fn hop_line(hop: &TraceHop) -> String {
    let who = match (&hop.hostname, hop.ip) {
        (Some(name), Some(ip)) if name != &ip.to_string() => format!("{name} ({ip})"),
        (_, Some(ip)) => ip.to_string(),
        (_, None) => "*".to_string(),
    };

    let probes: Vec<String> = hop
        .probes
        .iter()
        .map(|probe| match probe.status {
            Status::Success => millis(probe.rtt),
            Status::Failure => "!".to_string(),
            _ => "*".to_string(),
        })
        .collect();

    format!("{:>2}  {}  {}", hop.ttl, who, probes.join("  "))
}
