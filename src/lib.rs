//! Clean Probe - Proxy Endpoint and Clean IP Prober
//!
//! Probes proxy endpoint descriptors for transport latency, TLS handshake
//! latency and throughput, and discovers reachable addresses by sampling
//! CIDR blocks. Batches run with bounded concurrency, stream results as
//! they complete and can be cancelled by session id.

pub mod probe;

pub use probe::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
