use std::sync::Arc;

use anyhow::Context;
use colored::*;
use ntx_common::config::Config;
use ntx_common::ping::{PingOptions, Statistics};
use ntx_core::batch::{self, BatchOutcome};
use ntx_core::ping::{Pinger, PingerFactory};
use ntx_core::resolver::Resolver;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::commands::PingArgs;
use crate::terminal::{colors, format, print};

const KEY_WIDTH: usize = 8;

/// Returns whether every target answered at least once.
pub async fn ping(args: &PingArgs, cfg: &Config, cancel: &CancellationToken) -> anyhow::Result<bool> {
    let factory = PingerFactory::new(Arc::new(Resolver::new()));
    let opts: PingOptions = args.options();

    if let [target] = args.targets.as_slice() {
        if !cfg.is_json() {
            return stream_one(&factory, target, opts, cfg, cancel).await;
        }
    }

    let outcomes = batch::ping_many(&factory, &args.targets, &opts, cancel, cfg.concurrency).await;
    if cfg.is_json() {
        println!("{}", serde_json::to_string_pretty(&json_report(&outcomes))?);
    } else {
        print_outcomes(&outcomes, cfg);
    }

    Ok(outcomes
        .iter()
        .all(|o| matches!(&o.result, Ok(r) if r.statistics.received > 0)))
}

async fn stream_one(
    factory: &PingerFactory,
    target: &str,
    mut opts: PingOptions,
    cfg: &Config,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let mut pinger = factory.create(&mut opts)?;

    print::header(&format!("{} ping", opts.protocol), cfg.quiet);
    if cfg.quiet == 0 {
        print::print_status(format!(
            "{} {}",
            "Probing".color(colors::PRIMARY),
            target.color(colors::ACCENT)
        ));
    }

    let mut stream = pinger
        .ping_stream(cancel, target, &opts)
        .await
        .with_context(|| format!("pinging {target}"))?;

    let mut replies = Vec::new();
    while let Some(reply) = stream.recv().await {
        if cfg.quiet == 0 {
            let line = format::reply_line(&reply).color(format::status_color(reply.status));
            print::print(&line.to_string());
        }
        replies.push(reply);
    }
    pinger.close().await?;

    let stats = Statistics::from_replies(&replies);
    if cfg.quiet < 2 {
        print::header("statistics", cfg.quiet);
        print::aligned_line("Packets", KEY_WIDTH, format::loss_line(&stats));
        print::aligned_line("RTT", KEY_WIDTH, format::rtt_line(&stats));
    }
    Ok(stats.received > 0)
}

fn print_outcomes(outcomes: &[BatchOutcome], cfg: &Config) {
    print::header("ping results", cfg.quiet);

    for (idx, outcome) in outcomes.iter().enumerate() {
        if cfg.quiet >= 2 {
            continue;
        }
        print::tree_head(idx, &outcome.target);

        let details: Vec<(String, ColoredString)> = match &outcome.result {
            Ok(result) => {
                let mut details = vec![
                    ("Address".to_string(), format::ip(&result.target.ip)),
                    ("Protocol".to_string(), result.protocol.to_string().normal()),
                    (
                        "Status".to_string(),
                        result
                            .status
                            .to_string()
                            .color(format::status_color(result.status)),
                    ),
                    ("Packets".to_string(), format::loss_line(&result.statistics).normal()),
                    ("RTT".to_string(), format::rtt_line(&result.statistics).normal()),
                ];
                if let Some(error) = &result.error {
                    details.push(("Error".to_string(), error.color(colors::FAILURE)));
                }
                details
            }
            Err(e) => vec![("Error".to_string(), e.to_string().color(colors::FAILURE))],
        };
        print::as_tree_one_level(details);
    }

    let answered = outcomes
        .iter()
        .filter(|o| matches!(&o.result, Ok(r) if r.statistics.received > 0))
        .count();
    if answered == 0 {
        print::no_results("No target answered");
    }
}

fn json_report(outcomes: &[BatchOutcome]) -> serde_json::Value {
    outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(result) => json!({ "target": outcome.target, "result": result }),
            Err(e) => json!({ "target": outcome.target, "error": e.to_string() }),
        })
        .collect()
}
