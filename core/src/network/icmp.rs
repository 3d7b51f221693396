//! ICMP transport: one IPv4 and an optional IPv6 socket, and the
//! send-then-match exchange for a single echo probe.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use ntx_common::NtxError;
use ntx_protocols::icmp::{self, EchoId, Family, IcmpMessage, Quoted};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MIN_RECV_BUF_LEN: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Reply { from: IpAddr },
    TimeExceeded { from: IpAddr },
    Unreachable { from: IpAddr, code: u8 },
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoResponse {
    pub kind: ResponseKind,
    pub rtt: Duration,
    /// Size of the ICMP message received, `0` on timeout.
    pub bytes: usize,
    pub ttl_enforced: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EchoProbe {
    pub dest: IpAddr,
    pub sequence: u16,
    pub payload_size: usize,
    pub ttl: u8,
    pub tos: u8,
    pub timeout: Duration,
}

struct IcmpSocket {
    inner: UdpSocket,
    family: Family,
    /// Unprivileged ping socket. The kernel owns the echo identifier.
    dgram: bool,
}

impl IcmpSocket {
    fn open(family: Family) -> io::Result<Self> {
        let (domain, protocol) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let (socket, dgram) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(socket) => (socket, false),
            Err(raw_err) => match Socket::new(domain, Type::DGRAM, Some(protocol)) {
                Ok(socket) => (socket, true),
                Err(_) => return Err(raw_err),
            },
        };
        socket.set_nonblocking(true)?;

        Ok(Self {
            inner: UdpSocket::from_std(std::net::UdpSocket::from(socket))?,
            family,
            dgram,
        })
    }

    /// Applies the outgoing TTL. True only when it will reach the wire.
    fn apply_ttl(&self, ttl: u8) -> bool {
        let sock = SockRef::from(&self.inner);
        let res = match self.family {
            Family::V4 => sock.set_ttl(ttl as u32),
            Family::V6 => sock.set_unicast_hops_v6(ttl as u32),
        };
        match res {
            Ok(()) => !self.dgram,
            Err(e) => {
                debug!("Could not set TTL {ttl}: {e}");
                false
            }
        }
    }

    fn apply_tos(&self, tos: u8) {
        if tos == 0 || self.family != Family::V4 {
            return;
        }
        if let Err(e) = SockRef::from(&self.inner).set_tos(tos as u32) {
            debug!("Could not set TOS {tos}: {e}");
        }
    }
}

pub struct IcmpTransport {
    v4: Option<IcmpSocket>,
    v6: Option<IcmpSocket>,
    identifier: u16,
    busy: Mutex<()>,
}

impl IcmpTransport {
    /// Opens the sockets. The IPv4 socket is mandatory, IPv6 is optional.
    pub fn open() -> Result<Self, NtxError> {
        let v4 = IcmpSocket::open(Family::V4).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                NtxError::permission("open", "icmp socket")
            } else {
                NtxError::Io(e)
            }
        })?;

        let v6 = match IcmpSocket::open(Family::V6) {
            Ok(socket) => Some(socket),
            Err(e) => {
                debug!("IPv6 ICMP unavailable: {e}");
                None
            }
        };

        debug!(
            "ICMP transport ready ({}, ipv6: {})",
            if v4.dgram { "dgram" } else { "raw" },
            v6.is_some()
        );

        Ok(Self {
            v4: Some(v4),
            v6,
            identifier: icmp::process_identifier(),
            busy: Mutex::new(()),
        })
    }

    pub fn supports(&self, ip: &IpAddr) -> bool {
        self.socket_for(ip).is_some()
    }

    /// Whether per-probe TTLs reach the wire for this address family.
    pub fn ttl_enforced(&self, ip: &IpAddr) -> bool {
        self.socket_for(ip).is_some_and(|socket| !socket.dgram)
    }

    fn socket_for(&self, ip: &IpAddr) -> Option<&IcmpSocket> {
        match ip {
            IpAddr::V4(_) => self.v4.as_ref(),
            IpAddr::V6(_) => self.v6.as_ref(),
        }
    }

    /// Sends one Echo Request and waits for the reply or an ICMP error
    /// quoting it. Unrelated traffic is skipped until the probe times out.
    ///
    /// Probes on one transport are serialized.
    pub async fn probe(
        &self,
        probe: &EchoProbe,
        cancel: &CancellationToken,
    ) -> Result<EchoResponse, NtxError> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NtxError::Cancelled),
            guard = self.busy.lock() => guard,
        };

        let socket = self.socket_for(&probe.dest).ok_or(NtxError::Closed)?;
        let ttl_enforced = socket.apply_ttl(probe.ttl);
        socket.apply_tos(probe.tos);

        let expected = EchoId {
            identifier: self.identifier,
            sequence: probe.sequence,
        };
        let packet = icmp::build_echo_request(socket.family, expected, probe.payload_size)
            .map_err(io::Error::other)?;
        let mut buf = vec![0u8; (probe.payload_size + 128).max(MIN_RECV_BUF_LEN)];

        let start = Instant::now();
        let exchange = async {
            socket
                .inner
                .send_to(&packet, SocketAddr::new(probe.dest, 0))
                .await?;
            loop {
                let (n, from) = socket.inner.recv_from(&mut buf).await?;
                if let Some(found) =
                    classify(socket.family, socket.dgram, &buf[..n], from.ip(), probe.dest, expected)
                {
                    return Ok::<_, io::Error>(found);
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NtxError::Cancelled),
            res = tokio::time::timeout(probe.timeout, exchange) => match res {
                Ok(Ok((kind, bytes))) => Ok(EchoResponse {
                    kind,
                    rtt: start.elapsed(),
                    bytes,
                    ttl_enforced,
                }),
                Ok(Err(e)) => Err(NtxError::Io(e)),
                Err(_elapsed) => Ok(EchoResponse {
                    kind: ResponseKind::Timeout,
                    rtt: start.elapsed(),
                    bytes: 0,
                    ttl_enforced,
                }),
            },
        }
    }
}

/// Matches a received datagram against the outstanding probe.
///
/// Ping sockets rewrite the identifier, so only the sequence is compared
/// there. Raw sockets of other transports in this process see the same
/// traffic, so echo replies must come from the probed address and errors
/// must quote a request that was headed there.
fn classify(
    family: Family,
    dgram: bool,
    buf: &[u8],
    from: IpAddr,
    dest: IpAddr,
    expected: EchoId,
) -> Option<(ResponseKind, usize)> {
    let message: &[u8] = match family {
        Family::V4 => icmp::strip_ipv4_header(buf),
        Family::V6 => buf,
    };
    let ours = |got: EchoId| {
        got.sequence == expected.sequence && (dgram || got.identifier == expected.identifier)
    };
    let quotes_ours = |quoted: Quoted| quoted.dest == dest && ours(quoted.id);

    let kind = match icmp::parse_message(family, message)? {
        IcmpMessage::EchoReply(got) if ours(got) && from == dest => ResponseKind::Reply { from },
        IcmpMessage::TimeExceeded(Some(quoted)) if quotes_ours(quoted) => {
            ResponseKind::TimeExceeded { from }
        }
        IcmpMessage::Unreachable {
            code,
            quoted: Some(quoted),
        } if quotes_ours(quoted) => ResponseKind::Unreachable { from, code },
        _ => return None,
    };
    Some((kind, message.len()))
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

    const DEST_V4: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const DEST: IpAddr = IpAddr::V4(DEST_V4);
    const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const ID: EchoId = EchoId {
        identifier: 0xbeef,
        sequence: 3,
    };

    fn reply(id: EchoId) -> Vec<u8> {
        let mut packet = icmp::build_echo_request(Family::V4, id, 8).unwrap();
        packet[0] = 0;
        packet
    }

    fn time_exceeded(id: EchoId, quoted_dest: Ipv4Addr) -> Vec<u8> {
        let mut message = vec![11, 0, 0, 0, 0, 0, 0, 0];
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 1;
        ip[16..20].copy_from_slice(&quoted_dest.octets());
        message.extend_from_slice(&ip);
        message.extend_from_slice(&icmp::build_echo_request(Family::V4, id, 0).unwrap());
        message
    }

    #[test]
    fn accepts_matching_reply() {
        let found = classify(Family::V4, false, &reply(ID), DEST, DEST, ID);
        assert_eq!(found, Some((ResponseKind::Reply { from: DEST }, 16)));
    }

    #[test]
    fn discards_foreign_replies() {
        let other_id = EchoId {
            identifier: 0x1111,
            ..ID
        };
        let other_seq = EchoId { sequence: 4, ..ID };

        assert_eq!(classify(Family::V4, false, &reply(other_id), DEST, DEST, ID), None);
        assert_eq!(classify(Family::V4, false, &reply(other_seq), DEST, DEST, ID), None);
        assert_eq!(classify(Family::V4, false, &reply(ID), ROUTER, DEST, ID), None);
    }

    #[test]
    fn ping_sockets_ignore_identifier() {
        let rewritten = EchoId {
            identifier: 0x0042,
            ..ID
        };
        let found = classify(Family::V4, true, &reply(rewritten), DEST, DEST, ID);
        assert!(matches!(found, Some((ResponseKind::Reply { .. }, _))));
    }

    #[test]
    fn router_errors_quote_our_probe() {
        let found = classify(Family::V4, false, &time_exceeded(ID, DEST_V4), ROUTER, DEST, ID);
        assert_eq!(
            found.map(|(kind, _)| kind),
            Some(ResponseKind::TimeExceeded { from: ROUTER })
        );

        let stale = EchoId { sequence: 2, ..ID };
        assert_eq!(
            classify(Family::V4, false, &time_exceeded(stale, DEST_V4), ROUTER, DEST, ID),
            None
        );
    }

    #[test]
    fn router_errors_for_other_destinations_are_ignored() {
        let elsewhere = Ipv4Addr::new(198, 51, 100, 7);
        let message = time_exceeded(ID, elsewhere);
        assert_eq!(classify(Family::V4, false, &message, ROUTER, DEST, ID), None);
        assert_eq!(classify(Family::V4, true, &message, ROUTER, DEST, ID), None);
    }

    #[tokio::test]
    #[ignore]
    async fn loopback_echo_needs_icmp_privileges() {
        let transport = IcmpTransport::open().unwrap();
        let probe = EchoProbe {
            dest: IpAddr::V4(Ipv4Addr::LOCALHOST),
            sequence: 1,
            payload_size: 56,
            ttl: 64,
            tos: 0,
            timeout: Duration::from_secs(1),
        };
        let response = transport
            .probe(&probe, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(response.kind, ResponseKind::Reply { .. }));
    }
}
