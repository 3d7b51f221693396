use std::sync::Arc;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::protocol::Protocol;
use ntx_common::ping::{PingOptions, PingResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{HttpPinger, IcmpPinger, PingStream, Pinger, TcpPinger};
use crate::network::icmp::IcmpTransport;
use crate::resolver::Resolver;

pub type IcmpOpener = fn() -> Result<IcmpTransport, NtxError>;

/// The pinger picked for a protocol.
pub enum AnyPinger {
    Icmp(IcmpPinger),
    Tcp(TcpPinger),
    Http(HttpPinger),
}

#[async_trait]
impl Pinger for AnyPinger {
    fn protocol(&self) -> Protocol {
        match self {
            AnyPinger::Icmp(p) => p.protocol(),
            AnyPinger::Tcp(p) => p.protocol(),
            AnyPinger::Http(p) => p.protocol(),
        }
    }

    async fn ping(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingResult, NtxError> {
        match self {
            AnyPinger::Icmp(p) => p.ping(cancel, target, opts).await,
            AnyPinger::Tcp(p) => p.ping(cancel, target, opts).await,
            AnyPinger::Http(p) => p.ping(cancel, target, opts).await,
        }
    }

    async fn ping_stream(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingStream, NtxError> {
        match self {
            AnyPinger::Icmp(p) => p.ping_stream(cancel, target, opts).await,
            AnyPinger::Tcp(p) => p.ping_stream(cancel, target, opts).await,
            AnyPinger::Http(p) => p.ping_stream(cancel, target, opts).await,
        }
    }

    async fn close(&mut self) -> Result<(), NtxError> {
        match self {
            AnyPinger::Icmp(p) => p.close().await,
            AnyPinger::Tcp(p) => p.close().await,
            AnyPinger::Http(p) => p.close().await,
        }
    }
}

#[derive(Clone)]
pub struct PingerFactory {
    resolver: Arc<Resolver>,
    icmp_opener: IcmpOpener,
}

impl PingerFactory {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self::with_icmp_opener(resolver, IcmpTransport::open)
    }

    /// Uses `opener` instead of opening real ICMP sockets.
    pub fn with_icmp_opener(resolver: Arc<Resolver>, opener: IcmpOpener) -> Self {
        Self {
            resolver,
            icmp_opener: opener,
        }
    }

    /// Builds the pinger for `opts.protocol`.
    ///
    /// When ICMP sockets are refused for lack of privilege, `opts` is
    /// rewritten to TCP on the default port and a TCP pinger is returned.
    /// Every other error propagates.
    pub fn create(&self, opts: &mut PingOptions) -> Result<AnyPinger, NtxError> {
        let resolver = Arc::clone(&self.resolver);
        match opts.protocol {
            Protocol::Icmp => match (self.icmp_opener)() {
                Ok(transport) => Ok(AnyPinger::Icmp(IcmpPinger::with_transport(
                    resolver, transport,
                ))),
                Err(e) if e.is_permission_denied() => {
                    warn!("ICMP unavailable ({e}), falling back to TCP");
                    opts.protocol = Protocol::Tcp;
                    opts.ensure_port("");
                    Ok(AnyPinger::Tcp(TcpPinger::new(resolver)))
                }
                Err(e) => Err(e),
            },
            Protocol::Tcp => Ok(AnyPinger::Tcp(TcpPinger::new(resolver))),
            Protocol::Http | Protocol::Https => Ok(AnyPinger::Http(HttpPinger::new(resolver))),
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

#[cfg(test)]
mod tests {
    use super::*;
    use ntx_common::network::protocol::Status;
    use std::io;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn denied() -> Result<IcmpTransport, NtxError> {
        Err(NtxError::permission("open", "icmp socket"))
    }

    fn broken() -> Result<IcmpTransport, NtxError> {
        Err(NtxError::Io(io::Error::other("no icmp support")))
    }

    #[tokio::test]
    async fn denied_icmp_falls_back_to_tcp() {
        let factory = PingerFactory::with_icmp_opener(Arc::new(Resolver::new()), denied);
        let mut opts = PingOptions {
            count: 1,
            timeout: Duration::from_secs(2),
            ..PingOptions::default()
        };

        let pinger = factory.create(&mut opts).unwrap();
        assert_eq!(pinger.protocol(), Protocol::Tcp);
        assert_eq!(opts.protocol, Protocol::Tcp);
        assert_eq!(opts.port, Some(80));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let result = pinger
            .ping(&CancellationToken::new(), &format!("127.0.0.1:{port}"), &opts)
            .await
            .unwrap();
        assert_eq!(result.status, Status::Success);
    }

    #[test]
    fn explicit_port_survives_fallback() {
        let factory = PingerFactory::with_icmp_opener(Arc::new(Resolver::new()), denied);
        let mut opts = PingOptions {
            port: Some(443),
            ..PingOptions::default()
        };
        factory.create(&mut opts).unwrap();
        assert_eq!(opts.port, Some(443));
    }

    #[test]
    fn other_icmp_errors_propagate() {
        let factory = PingerFactory::with_icmp_opener(Arc::new(Resolver::new()), broken);
        let mut opts = PingOptions::default();
        assert!(matches!(factory.create(&mut opts), Err(NtxError::Io(_))));
        assert_eq!(opts.protocol, Protocol::Icmp);
    }

    #[test]
    fn dispatches_on_protocol() {
        let factory = PingerFactory::new(Arc::new(Resolver::new()));
        for (protocol, expected) in [
            (Protocol::Tcp, Protocol::Tcp),
            (Protocol::Http, Protocol::Http),
            (Protocol::Https, Protocol::Http),
        ] {
            let mut opts = PingOptions {
                protocol,
                ..PingOptions::default()
            };
            assert_eq!(factory.create(&mut opts).unwrap().protocol(), expected);
        }
    }
}
