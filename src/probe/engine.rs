//! Probe engine running latency, throughput and discovery batches

use crate::probe::error::ProbeError;
use crate::probe::events::EventSink;
use crate::probe::models::{BatchKind, Descriptor, DiscoveryCandidate, ProbeEvent, ProbeReport};
use crate::probe::pool::TaskPool;
use crate::probe::sampler::{AddressSampler, DiscoveryMode, DEFAULT_BLOCKS};
use crate::probe::session::SessionRegistry;
use crate::probe::tls;
use ipnet::Ipv4Net;
use reqwest::header::{HOST, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Default timeout for transport connects and TLS handshakes in milliseconds
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;

/// Default timeout for a throughput transfer in milliseconds
const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_LATENCY_CONCURRENCY: usize = 50;
const DEFAULT_THROUGHPUT_CONCURRENCY: usize = 5;
const DEFAULT_DISCOVERY_CONCURRENCY: usize = 100;

/// Discovery completions between progress events
const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Default payload requested by a throughput probe
pub const DEFAULT_TRANSFER_BYTES: u64 = 1024 * 1024;

/// Host whose download endpoint throughput and discovery probes present
pub const DEFAULT_THROUGHPUT_HOST: &str = "speed.cloudflare.com";

const DEFAULT_DISCOVERY_PORT: u16 = 443;

const PROBE_USER_AGENT: &str = "Mozilla/5.0";

/// Configuration for the probe engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for the raw transport connect of a latency probe
    pub connect_timeout: Duration,
    /// Timeout for connect plus TLS handshake of a latency probe
    pub handshake_timeout: Duration,
    /// Timeout for a whole throughput transfer
    pub transfer_timeout: Duration,
    /// Timeout for a discovery handshake
    pub discovery_timeout: Duration,
    pub latency_concurrency: usize,
    pub throughput_concurrency: usize,
    pub discovery_concurrency: usize,
    /// Emit discovery progress every this many completed attempts
    pub progress_interval: usize,
    /// Transfer size used when a throughput batch does not specify one
    pub transfer_bytes: u64,
    /// Virtual host sent as SNI and Host header by throughput and discovery probes
    pub throughput_host: String,
    pub discovery_port: u16,
    /// Address space sampled by discovery
    pub blocks: Vec<Ipv4Net>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            transfer_timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            discovery_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            latency_concurrency: DEFAULT_LATENCY_CONCURRENCY,
            throughput_concurrency: DEFAULT_THROUGHPUT_CONCURRENCY,
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            transfer_bytes: DEFAULT_TRANSFER_BYTES,
            throughput_host: DEFAULT_THROUGHPUT_HOST.to_string(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            blocks: DEFAULT_BLOCKS.clone(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both the transport connect and TLS handshake timeouts
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_latency_concurrency(mut self, concurrency: usize) -> Self {
        self.latency_concurrency = concurrency;
        self
    }

    pub fn with_throughput_concurrency(mut self, concurrency: usize) -> Self {
        self.throughput_concurrency = concurrency;
        self
    }

    pub fn with_discovery_concurrency(mut self, concurrency: usize) -> Self {
        self.discovery_concurrency = concurrency;
        self
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_transfer_bytes(mut self, bytes: u64) -> Self {
        self.transfer_bytes = bytes;
        self
    }

    pub fn with_throughput_host(mut self, host: String) -> Self {
        self.throughput_host = host;
        self
    }

    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Ipv4Net>) -> Self {
        self.blocks = blocks;
        self
    }
}

/// Convert a completed transfer into MB/s (1 MB = 1024 * 1024 bytes)
pub fn megabytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / (1024.0 * 1024.0)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Runs probe batches under per-session cancellation and reports through an [`EventSink`].
///
/// Every unit checks its session's token before touching the network. A
/// cancelled unit emits nothing; units already past the check finish and
/// report normally. Each batch ends with exactly one `batch-complete` event.
pub struct ProbeEngine {
    config: Arc<EngineConfig>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
    connector: TlsConnector,
}

impl ProbeEngine {
    /// Create an engine with default configuration
    pub fn new<S: EventSink + 'static>(sink: S) -> Self {
        Self::with_config(EngineConfig::default(), sink)
    }

    /// Create an engine with custom configuration
    pub fn with_config<S: EventSink + 'static>(config: EngineConfig, sink: S) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            sink: Arc::new(sink),
            connector: tls::insecure_connector(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start a latency batch in the background.
    ///
    /// The session is registered before this returns, so a following
    /// [`cancel`](Self::cancel) always finds it.
    pub fn start_latency_batch(
        &self,
        descriptors: Vec<Descriptor>,
        session_id: &str,
    ) -> JoinHandle<()> {
        let token = self.registry.begin(session_id);
        let engine = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            engine
                .run_latency_batch(descriptors, &session_id, token)
                .await
        })
    }

    /// Start a throughput batch in the background; `None` uses the configured transfer size
    pub fn start_throughput_batch(
        &self,
        descriptors: Vec<Descriptor>,
        session_id: &str,
        transfer_bytes: Option<u64>,
    ) -> JoinHandle<()> {
        let token = self.registry.begin(session_id);
        let engine = self.clone();
        let session_id = session_id.to_string();
        let bytes = transfer_bytes.unwrap_or(self.config.transfer_bytes);
        tokio::spawn(async move {
            engine
                .run_throughput_batch(descriptors, &session_id, bytes, token)
                .await
        })
    }

    /// Sample candidate addresses for `mode` and start a discovery batch in the background
    pub fn start_discovery_batch(&self, mode: DiscoveryMode, session_id: &str) -> JoinHandle<()> {
        let token = self.registry.begin(session_id);
        let candidates =
            AddressSampler::new(self.config.blocks.clone()).sample(mode.samples_per_block());
        let engine = self.clone();
        let session_id = session_id.to_string();
        info!(session = %session_id, %mode, "sampled discovery candidates");
        tokio::spawn(async move {
            engine
                .run_discovery_batch(candidates, &session_id, token)
                .await
        })
    }

    /// Cancel a running session; unknown ids are ignored
    pub fn cancel(&self, session_id: &str) {
        self.registry.cancel(session_id);
    }

    async fn run_latency_batch(
        &self,
        descriptors: Vec<Descriptor>,
        session_id: &str,
        token: CancellationToken,
    ) {
        info!(session = session_id, targets = descriptors.len(), "starting latency batch");
        let pool = TaskPool::new(self.config.latency_concurrency);
        let token = &token;

        let units = descriptors.into_iter().map(|descriptor| async move {
            if token.is_cancelled() {
                return;
            }
            let report = self.probe_latency(descriptor).await;
            self.sink.emit(session_id, ProbeEvent::LatencyResult(report));
        });
        pool.run(units).await;

        self.finish(session_id, BatchKind::Latency);
    }

    async fn run_throughput_batch(
        &self,
        descriptors: Vec<Descriptor>,
        session_id: &str,
        transfer_bytes: u64,
        token: CancellationToken,
    ) {
        info!(
            session = session_id,
            targets = descriptors.len(),
            transfer_bytes,
            "starting throughput batch"
        );
        let pool = TaskPool::new(self.config.throughput_concurrency);
        let token = &token;

        let units = descriptors.into_iter().map(|descriptor| async move {
            if token.is_cancelled() {
                return;
            }
            let report = self.probe_throughput(descriptor, transfer_bytes).await;
            self.sink
                .emit(session_id, ProbeEvent::ThroughputResult(report));
        });
        pool.run(units).await;

        self.finish(session_id, BatchKind::Throughput);
    }

    async fn run_discovery_batch(
        &self,
        candidates: Vec<Ipv4Addr>,
        session_id: &str,
        token: CancellationToken,
    ) {
        let total = candidates.len();
        info!(session = session_id, total, "starting discovery batch");
        self.sink
            .emit(session_id, ProbeEvent::DiscoveryBatchStarted { total });

        let pool = TaskPool::new(self.config.discovery_concurrency);
        let interval = self.config.progress_interval.max(1);
        let processed = AtomicUsize::new(0);
        let token = &token;
        let processed = &processed;

        let units = candidates.into_iter().map(|address| async move {
            if token.is_cancelled() {
                return;
            }
            match self.probe_discovery(address).await {
                Ok(candidate) => self.sink.emit(session_id, ProbeEvent::DiscoveryFound(candidate)),
                Err(e) => trace!(
                    %address,
                    error = %e,
                    timeout = e.is_timeout(),
                    "discovery probe failed"
                ),
            }

            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            if done % interval == 0 {
                self.sink.emit(
                    session_id,
                    ProbeEvent::DiscoveryProgress {
                        processed: done,
                        total,
                    },
                );
            }
        });
        pool.run(units).await;

        self.finish(session_id, BatchKind::Discovery);
    }

    fn finish(&self, session_id: &str, kind: BatchKind) {
        self.sink.emit(session_id, ProbeEvent::BatchComplete { kind });
        self.registry.end(session_id);
        info!(session = session_id, %kind, "batch complete");
    }

    /// Measure transport then TLS latency for one descriptor.
    ///
    /// The handshake is only attempted after the transport connect succeeded.
    /// A failed handshake leaves the result successful with a sentinel TLS latency.
    pub async fn probe_latency(&self, descriptor: Descriptor) -> ProbeReport {
        let addr = (descriptor.address.as_str(), descriptor.port);

        let transport_ms = match self.measure_connect(addr).await {
            Ok(ms) => ms,
            Err(e) => {
                debug!(
                    endpoint = %descriptor.endpoint(),
                    error = %e,
                    timeout = e.is_timeout(),
                    "transport probe failed"
                );
                return ProbeReport::latency_failed(descriptor, e.to_string());
            }
        };

        let tls_ms = match self
            .measure_handshake(
                addr,
                descriptor.server_name(),
                self.config.handshake_timeout,
            )
            .await
        {
            Ok(ms) => Some(ms),
            Err(e) => {
                debug!(
                    endpoint = %descriptor.endpoint(),
                    error = %e,
                    timeout = e.is_timeout(),
                    "TLS probe failed"
                );
                None
            }
        };

        ProbeReport::latency(descriptor, transport_ms, tls_ms)
    }

    /// Download from the throughput host through the descriptor's address
    pub async fn probe_throughput(&self, descriptor: Descriptor, transfer_bytes: u64) -> ProbeReport {
        let attempt = self.measure_throughput(&descriptor, transfer_bytes);
        let outcome = match timeout(self.config.transfer_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };

        match outcome {
            Ok(mbps) => ProbeReport::throughput(descriptor, mbps),
            Err(e) => {
                debug!(
                    endpoint = %descriptor.endpoint(),
                    error = %e,
                    timeout = e.is_timeout(),
                    "throughput probe failed"
                );
                ProbeReport::throughput_failed(descriptor, e.to_string())
            }
        }
    }

    /// TLS handshake against a bare address presenting the throughput host as SNI
    pub async fn probe_discovery(&self, address: Ipv4Addr) -> Result<DiscoveryCandidate, ProbeError> {
        let latency_ms = self
            .measure_handshake(
                (IpAddr::V4(address), self.config.discovery_port),
                &self.config.throughput_host,
                self.config.discovery_timeout,
            )
            .await?;
        Ok(DiscoveryCandidate {
            address,
            latency_ms,
        })
    }

    async fn measure_connect<A: ToSocketAddrs>(&self, addr: A) -> Result<f64, ProbeError> {
        let start = Instant::now();
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(ProbeError::Connect)?;
        let elapsed = elapsed_ms(start);
        drop(stream);
        Ok(elapsed)
    }

    /// Time a fresh connect plus TLS handshake
    async fn measure_handshake<A: ToSocketAddrs>(
        &self,
        addr: A,
        server_name: &str,
        limit: Duration,
    ) -> Result<f64, ProbeError> {
        let name = tls::server_name(server_name)?;
        let start = Instant::now();

        let attempt = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(ProbeError::Connect)?;
            tls::handshake(&self.connector, name, stream).await
        };
        let stream = timeout(limit, attempt)
            .await
            .map_err(|_| ProbeError::Timeout)??;

        let elapsed = elapsed_ms(start);
        drop(stream);
        Ok(elapsed)
    }

    async fn measure_throughput(
        &self,
        descriptor: &Descriptor,
        transfer_bytes: u64,
    ) -> Result<f64, ProbeError> {
        let host = self.config.throughput_host.as_str();
        let addr = resolve(&descriptor.address, descriptor.port).await?;

        // Dial the descriptor while presenting the throughput host
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .resolve(host, addr)
            .build()?;
        let url = format!(
            "https://{}:{}/__down?bytes={}",
            host, descriptor.port, transfer_bytes
        );

        let start = Instant::now();
        let mut response = client
            .get(&url)
            .header(HOST, host)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ProbeError::HttpStatus(response.status().as_u16()));
        }

        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
        }

        Ok(megabytes_per_second(received, start.elapsed()))
    }
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr, ProbeError> {
    let host = address.trim_start_matches('[').trim_end_matches(']');
    lookup_host((host, port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ProbeError::Resolve(address.to_string()))
}

impl Clone for ProbeEngine {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            connector: self.connector.clone(),
        }
    }
}
