//! The `Pinger` contract and the probe loop its implementations share.
//!
//! Every pinger resolves its target once into a session, then hands that
//! session to [`run_batch`] or [`spawn_stream`], which own sequencing,
//! spacing and cancellation.

pub mod factory;
pub mod http;
pub mod icmp;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::protocol::Protocol;
use ntx_common::ping::{ExecutionContext, PingOptions, PingReply, PingResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use factory::{AnyPinger, PingerFactory};
pub use http::HttpPinger;
pub use icmp::IcmpPinger;
pub use tcp::TcpPinger;

/// Replies in sequence order. Ends after `count` replies or on cancellation.
pub type PingStream = mpsc::Receiver<PingReply>;

pub const STREAM_BUFFER: usize = 16;

#[async_trait]
pub trait Pinger: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Runs the whole probe sequence and returns the finalized result.
    async fn ping(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingResult, NtxError>;

    /// Same probes as [`Pinger::ping`], delivered one by one from a
    /// background task. A slow reader holds the prober back.
    async fn ping_stream(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingStream, NtxError>;

    /// Releases the transport. Calling it twice is fine.
    async fn close(&mut self) -> Result<(), NtxError>;
}

/// One resolved target, ready to be probed.
#[async_trait]
pub(crate) trait Session: Send + Sync + 'static {
    /// `None` when cancelled before the probe completed.
    async fn probe(&self, seq: u32, cancel: &CancellationToken) -> Option<PingReply>;
}

struct Schedule {
    count: u32,
    interval: Duration,
    next_seq: u32,
}

impl Schedule {
    fn new(opts: &PingOptions) -> Self {
        Self {
            count: opts.count,
            interval: opts.interval,
            next_seq: 1,
        }
    }

    /// Next sequence number, after the inter-probe pause. `None` once the
    /// run is over or cancelled.
    async fn next(&mut self, cancel: &CancellationToken) -> Option<u32> {
        if cancel.is_cancelled() || (self.count != 0 && self.next_seq > self.count) {
            return None;
        }
        if self.next_seq > 1 && !self.interval.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        let seq = self.next_seq;
        self.next_seq = seq.checked_add(1)?;
        Some(seq)
    }
}

pub(crate) fn execution_context() -> ExecutionContext {
    ExecutionContext::start(sys_info::hostname().ok())
}

/// Runs a bounded probe sequence into `result` and finalizes it.
///
/// Cancellation before `count` probes completed fails the result. With
/// `count == 0` cancellation is the normal way to stop.
pub(crate) async fn run_batch<S: Session>(
    session: &S,
    mut result: PingResult,
    opts: &PingOptions,
    cancel: &CancellationToken,
) -> PingResult {
    let mut schedule = Schedule::new(opts);
    while let Some(seq) = schedule.next(cancel).await {
        match session.probe(seq, cancel).await {
            Some(reply) => result.add_reply(reply),
            None => break,
        }
    }

    let interrupted = opts.count != 0 && result.replies.len() < opts.count as usize;
    result.finalize(cancel.is_cancelled() && interrupted);
    result
}

pub(crate) fn spawn_stream<S: Session>(
    session: S,
    opts: &PingOptions,
    cancel: &CancellationToken,
) -> PingStream {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let mut schedule = Schedule::new(opts);
    let cancel = cancel.clone();

    tokio::spawn(async move {
        while let Some(seq) = schedule.next(&cancel).await {
            let Some(reply) = session.probe(seq, &cancel).await else {
                break;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(reply) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
