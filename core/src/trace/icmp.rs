use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::protocol::{IpVersion, Protocol, Status};
use ntx_common::trace::{TraceHop, TraceOptions, TraceProbe, TraceResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Tracer;
use crate::network::icmp::{EchoProbe, EchoResponse, IcmpTransport, ResponseKind};
use crate::ping::execution_context;
use crate::resolver::Resolver;

pub struct IcmpTracer {
    resolver: Arc<Resolver>,
    transport: Option<IcmpTransport>,
}

impl IcmpTracer {
    pub fn new(resolver: Arc<Resolver>) -> Result<Self, NtxError> {
        Ok(Self::with_transport(resolver, IcmpTransport::open()?))
    }

    pub fn with_transport(resolver: Arc<Resolver>, transport: IcmpTransport) -> Self {
        Self {
            resolver,
            transport: Some(transport),
        }
    }
}

#[async_trait]
impl Tracer for IcmpTracer {
    async fn trace(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &TraceOptions,
    ) -> Result<TraceResult, NtxError> {
        let transport = self.transport.as_ref().ok_or(NtxError::Closed)?;
        walk(transport, &self.resolver, cancel, target, opts).await
    }

    async fn close(&mut self) -> Result<(), NtxError> {
        self.transport = None;
        Ok(())
    }
}

/// What the hop loop needs from an ICMP transport.
#[async_trait]
pub(crate) trait HopTransport: Send + Sync {
    fn supports(&self, ip: &IpAddr) -> bool;

    fn ttl_enforced(&self, ip: &IpAddr) -> bool;

    async fn echo(
        &self,
        probe: &EchoProbe,
        cancel: &CancellationToken,
    ) -> Result<EchoResponse, NtxError>;
}

#[async_trait]
impl HopTransport for IcmpTransport {
    fn supports(&self, ip: &IpAddr) -> bool {
        IcmpTransport::supports(self, ip)
    }

    fn ttl_enforced(&self, ip: &IpAddr) -> bool {
        IcmpTransport::ttl_enforced(self, ip)
    }

    async fn echo(
        &self,
        probe: &EchoProbe,
        cancel: &CancellationToken,
    ) -> Result<EchoResponse, NtxError> {
        self.probe(probe, cancel).await
    }
}

/// Walks the path one TTL at a time until the destination answers, the
/// hop limit is hit or too many hops in a row stay silent.
async fn walk<T: HopTransport>(
    transport: &T,
    resolver: &Resolver,
    cancel: &CancellationToken,
    target: &str,
    opts: &TraceOptions,
) -> Result<TraceResult, NtxError> {
    opts.validate()?;
    if opts.protocol != Protocol::Icmp {
        return Err(NtxError::InvalidOption {
            field: "protocol",
            reason: format!("{} traces are not supported", opts.protocol),
        });
    }

    let host = resolver.resolve(target, opts.ip_version).await?;
    if !transport.supports(&host.ip) {
        return Err(NtxError::TransportUnavailable(IpVersion::of(&host.ip)));
    }

    let dest = host.ip;
    let mut result = TraceResult::new(host, Protocol::Icmp, execution_context());
    result.ttl_enforced = transport.ttl_enforced(&dest);
    if !result.ttl_enforced {
        warn!("Unprivileged ICMP socket, per-hop TTL is not enforced");
    }

    let mut wire_seq: u16 = 0;
    let mut cancelled = false;

    for ttl in opts.first_ttl..=opts.max_hops {
        let mut hop = TraceHop::new(ttl);

        for query in 1..=opts.queries as u32 {
            wire_seq = wire_seq.wrapping_add(1);
            let probe = EchoProbe {
                dest,
                sequence: wire_seq,
                payload_size: opts.packet_size,
                ttl,
                tos: 0,
                timeout: opts.timeout,
            };

            match transport.echo(&probe, cancel).await {
                Ok(response) => hop.add_probe(trace_probe(query, &response)),
                Err(NtxError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => hop.add_probe(TraceProbe {
                    seq: query,
                    ip: None,
                    rtt: Duration::ZERO,
                    status: Status::Failure,
                    error: Some(e.to_string()),
                }),
            }
        }

        hop.is_destination = is_destination(&hop, dest);
        if cancelled {
            if !hop.probes.is_empty() {
                result.add_hop(hop);
            }
            break;
        }

        if opts.resolve_hostnames {
            if let Some(ip) = hop.ip {
                hop.hostname = hop_name(resolver, ip, cancel).await;
            }
        }

        debug!("Hop {ttl}: {:?} ({} answers)", hop.ip, hop.success_count());
        result.add_hop(hop);
        if result.reached_destination {
            break;
        }
        if result.should_abandon(opts.first_ttl, opts.silent_hop_limit) {
            debug!("Giving up after {} silent hops", opts.silent_hop_limit);
            break;
        }
    }

    result.finalize(cancelled || cancel.is_cancelled());
    Ok(result)
}

async fn hop_name(resolver: &Resolver, ip: IpAddr, cancel: &CancellationToken) -> Option<String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        name = resolver.reverse_lookup(ip) => name,
    }
}

/// Time exceeded and echo replies both count as an answering hop.
fn trace_probe(seq: u32, response: &EchoResponse) -> TraceProbe {
    let (ip, status, error) = match response.kind {
        ResponseKind::Reply { from } | ResponseKind::TimeExceeded { from } => {
            (Some(from), Status::Success, None)
        }
        ResponseKind::Unreachable { from, code } => (
            Some(from),
            Status::Failure,
            Some(format!("destination unreachable (code {code})")),
        ),
        ResponseKind::Timeout => (None, Status::Timeout, None),
    };
    TraceProbe {
        seq,
        ip,
        rtt: response.rtt,
        status,
        error,
    }
}

fn is_destination(hop: &TraceHop, dest: IpAddr) -> bool {
    hop.probes
        .iter()
        .any(|probe| probe.is_success() && probe.ip == Some(dest))
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
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    const DEST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
    const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn response(kind: ResponseKind) -> EchoResponse {
        EchoResponse {
            kind,
            rtt: Duration::from_millis(4),
            bytes: 64,
            ttl_enforced: true,
        }
    }

    #[test]
    fn router_answers_are_successful_probes() {
        let probe = trace_probe(1, &response(ResponseKind::TimeExceeded { from: ROUTER }));
        assert_eq!(probe.status, Status::Success);
        assert_eq!(probe.ip, Some(ROUTER));

        let lost = trace_probe(2, &response(ResponseKind::Timeout));
        assert_eq!(lost.status, Status::Timeout);
        assert_eq!(lost.ip, None);

        let refused = trace_probe(
            3,
            &response(ResponseKind::Unreachable {
                from: DEST,
                code: 3,
            }),
        );
        assert_eq!(refused.status, Status::Failure);
    }

    #[test]
    fn destination_needs_a_successful_probe_from_the_target() {
        let mut intermediate = TraceHop::new(1);
        intermediate.add_probe(trace_probe(
            1,
            &response(ResponseKind::TimeExceeded { from: ROUTER }),
        ));
        assert!(!is_destination(&intermediate, DEST));

        let mut unreachable = TraceHop::new(2);
        unreachable.add_probe(trace_probe(
            1,
            &response(ResponseKind::Unreachable {
                from: DEST,
                code: 3,
            }),
        ));
        assert!(!is_destination(&unreachable, DEST));

        let mut last = TraceHop::new(3);
        last.add_probe(trace_probe(1, &response(ResponseKind::Timeout)));
        last.add_probe(trace_probe(2, &response(ResponseKind::Reply { from: DEST })));
        assert!(is_destination(&last, DEST));
    }

    /// A scripted path: `answers[n]` is what TTL `n + 1` sends back, TTLs
    /// past the end stay silent.
    struct ScriptedPath {
        answers: Vec<ResponseKind>,
        sent: Mutex<Vec<(u8, u16)>>,
        cancel_at_ttl: Option<(u8, CancellationToken)>,
    }

    impl ScriptedPath {
        fn new(answers: Vec<ResponseKind>) -> Self {
            Self {
                answers,
                sent: Mutex::new(Vec::new()),
                cancel_at_ttl: None,
            }
        }

        fn sent_ttls(&self) -> Vec<u8> {
            self.sent.lock().unwrap().iter().map(|(ttl, _)| *ttl).collect()
        }
    }

    #[async_trait]
    impl HopTransport for ScriptedPath {
        fn supports(&self, _ip: &IpAddr) -> bool {
            true
        }

        fn ttl_enforced(&self, _ip: &IpAddr) -> bool {
            true
        }

        async fn echo(
            &self,
            probe: &EchoProbe,
            cancel: &CancellationToken,
        ) -> Result<EchoResponse, NtxError> {
            if let Some((ttl, token)) = &self.cancel_at_ttl {
                if probe.ttl == *ttl {
                    token.cancel();
                }
            }
            if cancel.is_cancelled() {
                return Err(NtxError::Cancelled);
            }

            self.sent.lock().unwrap().push((probe.ttl, probe.sequence));
            let kind = self
                .answers
                .get(probe.ttl as usize - 1)
                .copied()
                .unwrap_or(ResponseKind::Timeout);
            Ok(response(kind))
        }
    }

    fn router(last: u8) -> ResponseKind {
        ResponseKind::TimeExceeded {
            from: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
        }
    }

    fn options() -> TraceOptions {
        TraceOptions {
            queries: 2,
            resolve_hostnames: false,
            ..TraceOptions::default()
        }
    }

    #[tokio::test]
    async fn silent_hops_end_the_trace() {
        let path = ScriptedPath::new(vec![router(1)]);
        let opts = TraceOptions {
            silent_hop_limit: 3,
            ..options()
        };

        let result = walk(&path, &Resolver::new(), &CancellationToken::new(), "192.0.2.10", &opts)
            .await
            .unwrap();

        assert_eq!(result.hop_count, 4);
        assert!(!result.reached_destination);
        assert_eq!(result.status, Status::Timeout);
        assert!(result.hops[1..].iter().all(TraceHop::is_silent));
        assert_eq!(path.sent_ttls(), vec![1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[tokio::test]
    async fn destination_reply_stops_the_walk() {
        let path = ScriptedPath::new(vec![
            router(1),
            router(2),
            ResponseKind::Reply { from: DEST },
            router(4),
        ]);
        let opts = TraceOptions {
            first_ttl: 2,
            ..options()
        };

        let result = walk(&path, &Resolver::new(), &CancellationToken::new(), "192.0.2.10", &opts)
            .await
            .unwrap();

        assert!(result.reached_destination);
        assert_eq!(result.status, Status::Success);
        let ttls: Vec<u8> = result.hops.iter().map(|hop| hop.ttl).collect();
        assert_eq!(ttls, vec![2, 3]);
        assert!(result.hops[1].is_destination);
        assert_eq!(path.sent_ttls(), vec![2, 2, 3, 3]);

        let seqs: Vec<u16> = path.sent.lock().unwrap().iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        let queries: Vec<u32> = result.hops[0].probes.iter().map(|p| p.seq).collect();
        assert_eq!(queries, vec![1, 2]);
    }

    #[tokio::test]
    async fn cancel_keeps_recorded_hops() {
        let cancel = CancellationToken::new();
        let mut path = ScriptedPath::new(vec![router(1), router(2), router(3)]);
        path.cancel_at_ttl = Some((3, cancel.clone()));

        let result = walk(&path, &Resolver::new(), &cancel, "192.0.2.10", &options())
            .await
            .unwrap();

        assert_eq!(result.hop_count, 2);
        assert_eq!(result.status, Status::Failure);
        assert_eq!(result.error.as_deref(), Some("operation cancelled"));
        assert_eq!(path.sent_ttls(), vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    #[ignore]
    async fn traces_loopback_in_one_hop() {
        let tracer = IcmpTracer::new(Arc::new(Resolver::new())).unwrap();
        let opts = TraceOptions {
            timeout: Duration::from_secs(1),
            resolve_hostnames: false,
            ..TraceOptions::default()
        };
        let result = tracer
            .trace(&CancellationToken::new(), "127.0.0.1", &opts)
            .await
            .unwrap();

        assert!(result.reached_destination);
        assert_eq!(result.hop_count, 1);
        assert_eq!(result.status, Status::Success);
    }
}
