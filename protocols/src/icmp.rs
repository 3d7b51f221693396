//! ICMP / ICMPv6 echo codec.
//!
//! Builds Echo Requests and classifies whatever comes back on an ICMP
//! socket: our Echo Replies, and Time Exceeded / Destination Unreachable
//! errors quoting one of our requests.

use std::net::IpAddr;

use anyhow::Context;
use pnet::packet::Packet;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};
use pnet::packet::icmpv6::{Icmpv6Packet, Icmpv6Types};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use rand::Rng;

pub const ICMP_HDR_LEN: usize = 8;
pub const IP_V4_MIN_HDR_LEN: usize = 20;
pub const IP_V6_HDR_LEN: usize = 40;

const ICMP_V6_ECHO_REQUEST: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoId {
    pub identifier: u16,
    pub sequence: u16,
}

/// The Echo Request an ICMP error quotes back, and where it was headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quoted {
    pub dest: IpAddr,
    pub id: EchoId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply(EchoId),
    /// A router dropped one of our requests when its TTL ran out.
    TimeExceeded(Option<Quoted>),
    Unreachable { code: u8, quoted: Option<Quoted> },
    /// Anything else: echo requests looped back, redirects, neighbour discovery.
    Other,
}

/// Echo identifier for this process.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Builds an Echo Request carrying `payload_size` random bytes.
///
/// The IPv4 checksum is filled in. ICMPv6 checksums cover a pseudo-header
/// the kernel owns, so it is left zero.
pub fn build_echo_request(
    family: Family,
    id: EchoId,
    payload_size: usize,
) -> anyhow::Result<Vec<u8>> {
    let mut buffer: Vec<u8> = vec![0u8; ICMP_HDR_LEN + payload_size];
    rand::rng().fill(&mut buffer[ICMP_HDR_LEN..]);

    {
        let mut echo: MutableEchoRequestPacket =
            MutableEchoRequestPacket::new(&mut buffer).context("creating echo request")?;
        match family {
            Family::V4 => echo.set_icmp_type(IcmpTypes::EchoRequest),
            Family::V6 => echo.set_icmp_type(IcmpType::new(ICMP_V6_ECHO_REQUEST)),
        }
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(id.identifier);
        echo.set_sequence_number(id.sequence);
        echo.set_checksum(0);
    }

    if family == Family::V4 {
        let csum: u16 = checksum(&IcmpPacket::new(&buffer).context("reading echo request")?);
        let mut echo: MutableEchoRequestPacket =
            MutableEchoRequestPacket::new(&mut buffer).context("creating echo request")?;
        echo.set_checksum(csum);
    }

    Ok(buffer)
}

/// Drops a leading IPv4 header, as delivered by raw IPv4 sockets.
/// Buffers that already start at the ICMP header are returned as is.
pub fn strip_ipv4_header(buf: &[u8]) -> &[u8] {
    if buf.first().map(|b| b >> 4) != Some(4) {
        return buf;
    }
    match Ipv4Packet::new(buf) {
        Some(ip) => {
            let ihl = ip.get_header_length() as usize * 4;
            if ihl >= IP_V4_MIN_HDR_LEN && buf.len() >= ihl {
                &buf[ihl..]
            } else {
                buf
            }
        }
        None => buf,
    }
}

/// Classifies an ICMP message. `None` when the buffer is too short to be one.
pub fn parse_message(family: Family, icmp: &[u8]) -> Option<IcmpMessage> {
    if icmp.len() < ICMP_HDR_LEN {
        return None;
    }
    match family {
        Family::V4 => parse_v4(icmp),
        Family::V6 => parse_v6(icmp),
    }
}

fn parse_v4(icmp: &[u8]) -> Option<IcmpMessage> {
    let packet = IcmpPacket::new(icmp)?;
    let quoted = || quoted_v4(packet.payload());

    let message = match packet.get_icmp_type() {
        IcmpTypes::EchoReply => IcmpMessage::EchoReply(echo_id(icmp)?),
        IcmpTypes::TimeExceeded => IcmpMessage::TimeExceeded(quoted()),
        IcmpTypes::DestinationUnreachable => IcmpMessage::Unreachable {
            code: packet.get_icmp_code().0,
            quoted: quoted(),
        },
        _ => IcmpMessage::Other,
    };
    Some(message)
}

fn parse_v6(icmp: &[u8]) -> Option<IcmpMessage> {
    let packet = Icmpv6Packet::new(icmp)?;
    let quoted = || quoted_v6(packet.payload());

    let message = match packet.get_icmpv6_type() {
        Icmpv6Types::EchoReply => IcmpMessage::EchoReply(echo_id(icmp)?),
        Icmpv6Types::TimeExceeded => IcmpMessage::TimeExceeded(quoted()),
        Icmpv6Types::DestinationUnreachable => IcmpMessage::Unreachable {
            code: packet.get_icmpv6_code().0,
            quoted: quoted(),
        },
        _ => IcmpMessage::Other,
    };
    Some(message)
}

// Error bodies start with 4 unused bytes, then the offending IP packet.
fn quoted_v4(payload: &[u8]) -> Option<Quoted> {
    let original: &[u8] = payload.get(4..)?;
    let ip = Ipv4Packet::new(original)?;
    let ihl = ip.get_header_length() as usize * 4;
    let inner: &[u8] = original.get(ihl..)?;
    match inner.first() {
        Some(&t) if t == IcmpTypes::EchoRequest.0 => Some(Quoted {
            dest: IpAddr::V4(ip.get_destination()),
            id: echo_id(inner)?,
        }),
        _ => None,
    }
}

fn quoted_v6(payload: &[u8]) -> Option<Quoted> {
    let ip = Ipv6Packet::new(payload.get(4..)?)?;
    let inner: &[u8] = payload.get(4 + IP_V6_HDR_LEN..)?;
    match inner.first() {
        Some(&ICMP_V6_ECHO_REQUEST) => Some(Quoted {
            dest: IpAddr::V6(ip.get_destination()),
            id: echo_id(inner)?,
        }),
        _ => None,
    }
}

fn echo_id(icmp: &[u8]) -> Option<EchoId> {
    let header: &[u8] = icmp.get(..ICMP_HDR_LEN)?;
    Some(EchoId {
        identifier: u16::from_be_bytes([header[4], header[5]]),
        sequence: u16::from_be_bytes([header[6], header[7]]),
    })
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
