//! Probe module for measuring proxy endpoints and discovering clean addresses
//!
//! This module provides functionality for:
//! - Parsing vless/vmess share links into descriptors
//! - Measuring transport and TLS latency with bounded concurrency
//! - Measuring download throughput through a candidate address
//! - Sampling and probing candidate addresses from CIDR blocks
//! - Cancelling running batches by session id

pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod parser;
pub mod pool;
pub mod sampler;
pub mod session;
pub mod tls;

pub use engine::{megabytes_per_second, EngineConfig, ProbeEngine};
pub use error::{ParseError, ProbeError};
pub use events::EventSink;
pub use models::{
    BatchKind, Descriptor, DescriptorKind, DiscoveryCandidate, ProbeEvent, ProbeReport,
    ProbeStatus, SessionEvent, FAILURE_SENTINEL,
};
pub use parser::DescriptorParser;
pub use pool::TaskPool;
pub use sampler::{AddressSampler, DiscoveryMode};
pub use session::SessionRegistry;
