use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::host::Host;
use ntx_common::network::protocol::{IpVersion, Protocol};
use ntx_common::ping::{PingOptions, PingReply, PingResult};
use tokio_util::sync::CancellationToken;

use super::{PingStream, Pinger, Session, execution_context, run_batch, spawn_stream};
use crate::network::icmp::{EchoProbe, IcmpTransport, ResponseKind};
use crate::resolver::Resolver;

pub struct IcmpPinger {
    resolver: Arc<Resolver>,
    transport: Option<Arc<IcmpTransport>>,
}

impl IcmpPinger {
    /// Opens the ICMP sockets, failing with [`NtxError::Permission`] when
    /// the process may not.
    pub fn new(resolver: Arc<Resolver>) -> Result<Self, NtxError> {
        Ok(Self::with_transport(resolver, IcmpTransport::open()?))
    }

    pub fn with_transport(resolver: Arc<Resolver>, transport: IcmpTransport) -> Self {
        Self {
            resolver,
            transport: Some(Arc::new(transport)),
        }
    }

    async fn session(
        &self,
        target: &str,
        opts: &PingOptions,
    ) -> Result<(Host, IcmpSession), NtxError> {
        let transport = self.transport.clone().ok_or(NtxError::Closed)?;
        opts.validate()?;

        let host = self.resolver.resolve(target, opts.ip_version).await?;
        if !transport.supports(&host.ip) {
            return Err(NtxError::TransportUnavailable(IpVersion::of(&host.ip)));
        }

        let session = IcmpSession {
            transport,
            dest: host.ip,
            payload_size: opts.size,
            ttl: opts.ttl,
            tos: opts.tos,
            timeout: opts.timeout,
        };
        Ok((host, session))
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    async fn ping(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingResult, NtxError> {
        let (host, session) = self.session(target, opts).await?;
        let result = PingResult::new(host, Protocol::Icmp, execution_context());
        Ok(run_batch(&session, result, opts, cancel).await)
    }

    async fn ping_stream(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingStream, NtxError> {
        let (_, session) = self.session(target, opts).await?;
        Ok(spawn_stream(session, opts, cancel))
    }

    async fn close(&mut self) -> Result<(), NtxError> {
        // Sockets close once in-flight streams drop their handle too.
        self.transport = None;
        Ok(())
    }
}

struct IcmpSession {
    transport: Arc<IcmpTransport>,
    dest: IpAddr,
    payload_size: usize,
    ttl: u8,
    tos: u8,
    timeout: Duration,
}

#[async_trait]
impl Session for IcmpSession {
    async fn probe(&self, seq: u32, cancel: &CancellationToken) -> Option<PingReply> {
        let probe = EchoProbe {
            dest: self.dest,
            sequence: seq as u16,
            payload_size: self.payload_size,
            ttl: self.ttl,
            tos: self.tos,
            timeout: self.timeout,
        };

        let response = match self.transport.probe(&probe, cancel).await {
            Ok(response) => response,
            Err(NtxError::Cancelled) => return None,
            Err(e) => {
                return Some(
                    PingReply::new(seq, self.dest.to_string())
                        .with_ttl(self.ttl, false)
                        .failure(e),
                );
            }
        };

        let reply = |from: IpAddr| {
            PingReply::new(seq, from.to_string()).with_ttl(self.ttl, response.ttl_enforced)
        };
        Some(match response.kind {
            ResponseKind::Reply { from } => reply(from).success(response.rtt, response.bytes),
            ResponseKind::TimeExceeded { from } => {
                reply(from).failure(format!("time to live exceeded at {from}"))
            }
            ResponseKind::Unreachable { from, code } => {
                reply(from).failure(format!("destination unreachable (code {code})"))
            }
            ResponseKind::Timeout => reply(self.dest).timeout(response.rtt),
        })
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
    use ntx_common::network::protocol::Status;

    #[tokio::test]
    #[ignore]
    async fn pings_loopback_with_privileges() {
        let mut pinger = IcmpPinger::new(Arc::new(Resolver::new())).unwrap();
        let opts = PingOptions {
            count: 2,
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
            ..PingOptions::default()
        };

        let result = pinger
            .ping(&CancellationToken::new(), "127.0.0.1", &opts)
            .await
            .unwrap();
        assert_eq!(result.statistics.sent, 2);
        assert_eq!(result.status, Status::Success);

        pinger.close().await.unwrap();
        pinger.close().await.unwrap();
        let closed = pinger
            .ping(&CancellationToken::new(), "127.0.0.1", &opts)
            .await;
        assert!(matches!(closed, Err(NtxError::Closed)));
    }
}
