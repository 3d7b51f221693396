//! Wire codecs used by the probing engine.

pub mod icmp;
