use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::host::Host;
use ntx_common::network::protocol::Protocol;
use ntx_common::network::target::Target;
use ntx_common::network::{DEFAULT_TCP_PORT, TCP_HANDSHAKE_BYTES};
use ntx_common::ping::{PingOptions, PingReply, PingResult};
use socket2::SockRef;
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PingStream, Pinger, Session, execution_context, run_batch, spawn_stream};
use crate::resolver::Resolver;

/// Probes by completing a TCP handshake. Nothing is sent on the connection.
pub struct TcpPinger {
    resolver: Arc<Resolver>,
}

impl TcpPinger {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    async fn session(
        &self,
        target: &str,
        opts: &PingOptions,
    ) -> Result<(Host, TcpSession), NtxError> {
        opts.validate()?;

        let parsed: Target = target.parse()?;
        let port = parsed.port_or(opts.port.unwrap_or(DEFAULT_TCP_PORT));

        let host = self
            .resolver
            .resolve(&parsed.host, opts.ip_version)
            .await?
            .with_port(port);

        let session = TcpSession {
            addr: SocketAddr::new(host.ip, port),
            timeout: opts.timeout,
            ttl: opts.ttl,
            tos: opts.tos,
        };
        Ok((host, session))
    }
}

#[async_trait]
impl Pinger for TcpPinger {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn ping(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingResult, NtxError> {
        let (host, session) = self.session(target, opts).await?;
        let result = PingResult::new(host, Protocol::Tcp, execution_context());
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
        Ok(())
    }
}

struct TcpSession {
    addr: SocketAddr,
    timeout: Duration,
    ttl: u8,
    tos: u8,
}

impl TcpSession {
    /// Returns whether the TTL was applied along with the connection attempt.
    fn socket(&self) -> io::Result<(TcpSocket, bool)> {
        let socket = match self.addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        let sock = SockRef::from(&socket);
        let ttl_set = match self.addr {
            SocketAddr::V4(_) => sock.set_ttl(self.ttl as u32),
            SocketAddr::V6(_) => sock.set_unicast_hops_v6(self.ttl as u32),
        };
        if let Err(e) = &ttl_set {
            debug!("Could not set TTL on TCP socket: {e}");
        }
        if self.tos != 0 && self.addr.is_ipv4() {
            if let Err(e) = sock.set_tos(self.tos as u32) {
                debug!("Could not set TOS on TCP socket: {e}");
            }
        }

        Ok((socket, ttl_set.is_ok()))
    }

    async fn connect(&self, socket: TcpSocket) -> io::Result<TcpStream> {
        socket.connect(self.addr).await
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn probe(&self, seq: u32, cancel: &CancellationToken) -> Option<PingReply> {
        let reply = PingReply::new(seq, self.addr.to_string());
        let (socket, ttl_enforced) = match self.socket() {
            Ok(socket) => socket,
            Err(e) => return Some(reply.with_ttl(self.ttl, false).failure(e)),
        };
        let reply = reply.with_ttl(self.ttl, ttl_enforced);

        let start = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(self.timeout, self.connect(socket)) => Some(match res {
                Ok(Ok(_stream)) => reply.success(start.elapsed(), TCP_HANDSHAKE_BYTES),
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => reply.timeout(start.elapsed()),
                Ok(Err(e)) => reply.failure(e),
                Err(_elapsed) => reply.timeout(start.elapsed()),
            }),
        }
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
