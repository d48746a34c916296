//! Reachability probes for target connections.

pub mod http;

pub use self::http::{ConnectionCheck, HttpProbe, DEFAULT_CHECK_TIMEOUT_MS};
