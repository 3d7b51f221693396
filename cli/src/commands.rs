pub mod ping;
pub mod trace;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ntx_common::config::{Config, OutputFormat};
use ntx_common::network::protocol::{IpVersion, Protocol};
use ntx_common::ping::PingOptions;
use ntx_common::trace::TraceOptions;

#[derive(Parser)]
#[command(name = "ntx")]
#[command(version, about = "Multi-protocol ping and traceroute.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Less output, repeat for even less
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// More log output, repeat for even more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true)]
    pub no_color: bool,

    /// Skip reverse DNS lookups of discovered addresses
    #[arg(short, long, global = true)]
    pub no_dns: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe one or more targets over ICMP, TCP or HTTP
    #[command(alias = "p")]
    Ping(PingArgs),
    /// Discover the route to a target
    #[command(alias = "t")]
    Trace(TraceArgs),
}

#[derive(Args)]
pub struct AddressFamily {
    /// Only use IPv4
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Only use IPv6
    #[arg(short = '6', long)]
    pub ipv6: bool,
}

impl AddressFamily {
    pub fn version(&self) -> IpVersion {
        match (self.ipv4, self.ipv6) {
            (true, _) => IpVersion::V4,
            (_, true) => IpVersion::V6,
            _ => IpVersion::Any,
        }
    }
}

#[derive(Args)]
pub struct PingArgs {
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<String>,

    /// icmp, tcp or http
    #[arg(short = 'P', long, default_value = "icmp")]
    pub protocol: Protocol,

    /// Probes per target, 0 runs until interrupted
    #[arg(short, long, default_value_t = 4)]
    pub count: u32,

    #[arg(short, long = "interval", value_name = "MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Per-probe timeout
    #[arg(short = 'W', long = "timeout", value_name = "MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// ICMP payload size in bytes
    #[arg(short, long, default_value_t = 64)]
    pub size: usize,

    #[arg(long, default_value_t = 64)]
    pub ttl: u8,

    #[arg(short, long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub family: AddressFamily,

    #[arg(long, default_value = "GET")]
    pub method: String,

    #[arg(long, default_value = "/")]
    pub path: String,

    /// IPv4 type-of-service byte
    #[arg(long, default_value_t = 0)]
    pub tos: u8,

    /// Targets probed at once
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl PingArgs {
    pub fn options(&self) -> PingOptions {
        PingOptions {
            protocol: self.protocol,
            count: self.count,
            interval: Duration::from_millis(self.interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            size: self.size,
            ttl: self.ttl,
            port: self.port,
            ip_version: self.family.version(),
            http_method: self.method.clone(),
            http_path: self.path.clone(),
            tos: self.tos,
        }
    }
}

#[derive(Args)]
pub struct TraceArgs {
    pub target: String,

    #[arg(short, long, default_value_t = 30)]
    pub max_hops: u8,

    #[arg(short, long, default_value_t = 1)]
    pub first_ttl: u8,

    /// Probes per hop
    #[arg(short = 'Q', long, default_value_t = 3)]
    pub queries: u8,

    /// Per-probe timeout
    #[arg(short = 'W', long = "timeout", value_name = "MS", default_value_t = 3000)]
    pub timeout_ms: u64,

    /// Echo payload size in bytes
    #[arg(short = 's', long = "size", default_value_t = 60)]
    pub packet_size: usize,

    #[command(flatten)]
    pub family: AddressFamily,

    /// Give up after this many silent hops in a row, 0 never gives up
    #[arg(long, default_value_t = 5)]
    pub silent_hops: u8,
}

impl TraceArgs {
    pub fn options(&self, cfg: &Config) -> TraceOptions {
        TraceOptions {
            max_hops: self.max_hops,
            timeout: Duration::from_millis(self.timeout_ms),
            queries: self.queries,
            packet_size: self.packet_size,
            ip_version: self.family.version(),
            first_ttl: self.first_ttl,
            silent_hop_limit: self.silent_hops,
            resolve_hostnames: !cfg.no_dns,
            ..TraceOptions::default()
        }
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn config(&self) -> Config {
        let concurrency = match &self.command {
            Commands::Ping(args) => args.concurrency,
            Commands::Trace(_) => None,
        };
        Config {
            quiet: self.quiet,
            no_color: self.no_color,
            no_dns: self.no_dns,
            output: if self.json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            concurrency,
        }
    }
}
