//! TTL-based path discovery.

pub mod icmp;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::trace::{TraceOptions, TraceResult};
use tokio_util::sync::CancellationToken;

pub use icmp::IcmpTracer;

#[async_trait]
pub trait Tracer: Send + Sync {
    /// Walks the path hop by hop. A cancelled trace still returns the hops
    /// recorded so far, marked as failed.
    async fn trace(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &TraceOptions,
    ) -> Result<TraceResult, NtxError>;

    async fn close(&mut self) -> Result<(), NtxError>;
}
