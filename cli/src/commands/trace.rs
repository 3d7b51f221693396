use std::sync::Arc;

use anyhow::Context;
use colored::*;
use ntx_common::config::Config;
use ntx_common::network::protocol::Status;
use ntx_core::resolver::Resolver;
use ntx_core::trace::{IcmpTracer, Tracer};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::commands::TraceArgs;
use crate::terminal::{colors, format, print};

const KEY_WIDTH: usize = 8;

/// Returns whether any hop answered.
pub async fn trace(args: &TraceArgs, cfg: &Config, cancel: &CancellationToken) -> anyhow::Result<bool> {
    let opts = args.options(cfg);
    let mut tracer = IcmpTracer::new(Arc::new(Resolver::new())).with_context(|| {
        if is_root::is_root() {
            "opening ICMP sockets".to_string()
        } else {
            "traceroute needs ICMP sockets, try running as root".to_string()
        }
    })?;

    if !cfg.is_json() {
        print::header("traceroute", cfg.quiet);
        if cfg.quiet == 0 {
            print::print_status(format!(
                "{} {}, {} hops max",
                "Tracing route to".color(colors::PRIMARY),
                args.target.color(colors::ACCENT),
                opts.max_hops
            ));
        }
    }

    let result = tracer
        .trace(cancel, &args.target, &opts)
        .await
        .with_context(|| format!("tracing {}", args.target))?;
    tracer.close().await?;

    if cfg.is_json() {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(result.status != Status::Failure);
    }

    if cfg.quiet < 2 {
        for hop in &result.hops {
            let color = if hop.is_silent() {
                colors::SEPARATOR
            } else {
                colors::TEXT_DEFAULT
            };
            print::print(&format::hop_line(hop).color(color).to_string());
        }
    }

    if !result.ttl_enforced {
        warn!("Per-hop TTL was not enforced, intermediate hops may be missing");
    }

    if cfg.quiet < 2 {
        print::header("summary", cfg.quiet);
        print::aligned_line("Target", KEY_WIDTH, format::ip(&result.target.ip));
        print::aligned_line("Hops", KEY_WIDTH, result.hop_count.to_string());
        print::aligned_line(
            "Reached",
            KEY_WIDTH,
            if result.reached_destination {
                "yes".color(colors::SUCCESS)
            } else {
                "no".color(colors::FAILURE)
            },
        );
        print::aligned_line(
            "Status",
            KEY_WIDTH,
            result
                .status
                .to_string()
                .color(format::status_color(result.status)),
        );
        print::aligned_line("Duration", KEY_WIDTH, format::millis(result.context.duration));
    }

    Ok(result.status != Status::Failure)
}
