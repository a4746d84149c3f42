//! Probe data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Value recorded for a measurement that failed.
pub const FAILURE_SENTINEL: f64 = -1.0;

/// Descriptor flavor enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    #[default]
    Vless,
    Vmess,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Vless => write!(f, "vless"),
            DescriptorKind::Vmess => write!(f, "vmess"),
        }
    }
}

/// One probe target.
///
/// The engine only reads `address`, `port`, `sni`/`host` and `tls`; the
/// remaining fields ride along so results can be correlated with the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub address: String,
    pub port: u16,
    pub id: String,
    pub path: String,
    pub host: String,
    pub sni: String,
    pub tls: bool,
    pub name: String,
    /// Caller-side correlation key, normally the share link it was parsed from.
    pub identity: String,
}

impl Descriptor {
    /// Create a descriptor for `address:port` with the address doubling as host and SNI
    pub fn new(kind: DescriptorKind, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            kind,
            host: address.clone(),
            sni: address.clone(),
            identity: format!("{}:{}", address, port),
            address,
            port,
            id: String::new(),
            path: "/".to_string(),
            tls: false,
            name: String::new(),
        }
    }

    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = sni.into();
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Server name to present during the TLS handshake
    pub fn server_name(&self) -> &str {
        [&self.sni, &self.host, &self.address]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or("", |s| s.as_str())
    }

    /// Get the target in HOST:PORT format
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.endpoint())
    }
}

/// Outcome of probing one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Failed,
}

/// Augmented copy of a descriptor emitted once per probed target.
///
/// Only the measurements taken by the batch kind are present; a failed
/// measurement holds [`FAILURE_SENTINEL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_latency_ms: Option<f64>,
    #[serde(rename = "throughputMBps", skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProbeReport {
    /// Transport probe succeeded; `tls_latency_ms` is `None` when the handshake failed
    pub fn latency(descriptor: Descriptor, transport_ms: f64, tls_ms: Option<f64>) -> Self {
        Self {
            descriptor,
            transport_latency_ms: Some(transport_ms),
            tls_latency_ms: Some(tls_ms.unwrap_or(FAILURE_SENTINEL)),
            throughput_mbps: None,
            status: ProbeStatus::Success,
            error_message: None,
        }
    }

    pub fn latency_failed(descriptor: Descriptor, error: String) -> Self {
        Self {
            descriptor,
            transport_latency_ms: Some(FAILURE_SENTINEL),
            tls_latency_ms: Some(FAILURE_SENTINEL),
            throughput_mbps: None,
            status: ProbeStatus::Failed,
            error_message: Some(error),
        }
    }

    pub fn throughput(descriptor: Descriptor, mbps: f64) -> Self {
        Self {
            descriptor,
            transport_latency_ms: None,
            tls_latency_ms: None,
            throughput_mbps: Some(mbps),
            status: ProbeStatus::Success,
            error_message: None,
        }
    }

    pub fn throughput_failed(descriptor: Descriptor, error: String) -> Self {
        Self {
            descriptor,
            transport_latency_ms: None,
            tls_latency_ms: None,
            throughput_mbps: Some(FAILURE_SENTINEL),
            status: ProbeStatus::Failed,
            error_message: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }
}

/// Address that completed a TLS handshake during discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryCandidate {
    pub address: Ipv4Addr,
    pub latency_ms: f64,
}

/// Probe kind a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Latency,
    Throughput,
    Discovery,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Latency => write!(f, "latency"),
            BatchKind::Throughput => write!(f, "throughput"),
            BatchKind::Discovery => write!(f, "discovery"),
        }
    }
}

/// Event emitted by the engine on a session's channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ProbeEvent {
    LatencyResult(ProbeReport),
    ThroughputResult(ProbeReport),
    DiscoveryFound(DiscoveryCandidate),
    DiscoveryBatchStarted { total: usize },
    DiscoveryProgress { processed: usize, total: usize },
    BatchComplete { kind: BatchKind },
}

impl ProbeEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ProbeEvent::LatencyResult(_) => "latency-result",
            ProbeEvent::ThroughputResult(_) => "throughput-result",
            ProbeEvent::DiscoveryFound(_) => "discovery-found",
            ProbeEvent::DiscoveryBatchStarted { .. } => "discovery-batch-started",
            ProbeEvent::DiscoveryProgress { .. } => "discovery-progress",
            ProbeEvent::BatchComplete { .. } => "batch-complete",
        }
    }
}

/// An event tagged with the session it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub event: ProbeEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_creation() {
        let descriptor = Descriptor::new(DescriptorKind::Vless, "104.16.1.1", 443);
        assert_eq!(descriptor.address, "104.16.1.1");
        assert_eq!(descriptor.port, 443);
        assert_eq!(descriptor.sni, "104.16.1.1");
        assert_eq!(descriptor.identity, "104.16.1.1:443");
        assert!(!descriptor.tls);
    }

    #[test]
    fn test_server_name_fallback() {
        let mut descriptor =
            Descriptor::new(DescriptorKind::Vmess, "1.2.3.4", 8443).with_sni("edge.example.com");
        assert_eq!(descriptor.server_name(), "edge.example.com");

        descriptor.sni.clear();
        descriptor.host = "cdn.example.com".to_string();
        assert_eq!(descriptor.server_name(), "cdn.example.com");

        descriptor.host.clear();
        assert_eq!(descriptor.server_name(), "1.2.3.4");
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let descriptor = Descriptor::new(DescriptorKind::Vless, "2606:4700::1", 443);
        assert_eq!(descriptor.endpoint(), "[2606:4700::1]:443");
        assert_eq!(descriptor.to_string(), "vless://[2606:4700::1]:443");
    }

    #[test]
    fn test_report_constructors() {
        let descriptor = Descriptor::new(DescriptorKind::Vless, "127.0.0.1", 443);

        let report = ProbeReport::latency(descriptor.clone(), 12.5, None);
        assert!(report.is_success());
        assert_eq!(report.tls_latency_ms, Some(FAILURE_SENTINEL));
        assert!(report.error_message.is_none());

        let report = ProbeReport::latency_failed(descriptor.clone(), "Timeout".to_string());
        assert!(!report.is_success());
        assert_eq!(report.transport_latency_ms, Some(FAILURE_SENTINEL));
        assert_eq!(report.tls_latency_ms, Some(FAILURE_SENTINEL));

        let report = ProbeReport::throughput_failed(descriptor, "HTTP 403".to_string());
        assert_eq!(report.throughput_mbps, Some(FAILURE_SENTINEL));
        assert!(report.transport_latency_ms.is_none());
    }

    #[test]
    fn test_report_wire_format() {
        let descriptor = Descriptor::new(DescriptorKind::Vless, "127.0.0.1", 443);
        let report = ProbeReport::latency(descriptor, 10.0, Some(20.0));
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["address"], "127.0.0.1");
        assert_eq!(value["transportLatencyMs"], 10.0);
        assert_eq!(value["tlsLatencyMs"], 20.0);
        assert_eq!(value["status"], "success");
        assert!(value.get("throughputMBps").is_none());
        assert!(value.get("errorMessage").is_none());
    }

    #[test]
    fn test_event_names() {
        let event = ProbeEvent::BatchComplete {
            kind: BatchKind::Discovery,
        };
        assert_eq!(event.name(), "batch-complete");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "batch-complete");
        assert_eq!(value["data"]["kind"], "discovery");

        let event = ProbeEvent::DiscoveryProgress {
            processed: 100,
            total: 700,
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["event"], event.name());
    }
}
