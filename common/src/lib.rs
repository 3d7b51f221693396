//! # NTX shared model
//!
//! Types shared by every crate of the workspace: the probing data model,
//! the option sets, the error taxonomy and the pure statistics engine.
//!
//! Nothing in here performs I/O.

pub mod config;
pub mod error;
pub mod network;
pub mod ping;
pub mod stats;
pub mod trace;
pub mod utils;

pub use error::NtxError;
