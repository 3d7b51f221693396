//! # NTX probing engine
//!
//! ICMP, TCP and HTTP pingers behind one [`ping::Pinger`] contract, an
//! ICMP tracer, a caching resolver and a bounded multi-target runner.

pub mod batch;
pub mod network;
pub mod ping;
pub mod resolver;
pub mod trace;
