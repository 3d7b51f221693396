pub mod host;
pub mod protocol;
pub mod target;

/// Default TCP port probed when neither the target nor the options carry one.
pub const DEFAULT_TCP_PORT: u16 = 80;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_TRACEROUTE_PORT: u16 = 33434;

/// Bytes accounted for a successful TCP handshake (SYN, SYN-ACK, ACK headers).
pub const TCP_HANDSHAKE_BYTES: usize = 40;
