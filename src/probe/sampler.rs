//! Candidate address sampling from CIDR blocks
//!
//! Discovery probes a random subset of a fixed address space instead of
//! enumerating it. Sampling is uniform and with replacement, so the same
//! address may be produced more than once.

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Address space eligible for discovery
pub const DISCOVERY_BLOCKS: [&str; 14] = [
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
];

/// Parsed form of [`DISCOVERY_BLOCKS`]
pub static DEFAULT_BLOCKS: Lazy<Vec<Ipv4Net>> = Lazy::new(|| {
    DISCOVERY_BLOCKS
        .iter()
        .map(|block| block.parse::<Ipv4Net>().map(|net| net.trunc()))
        .collect::<Result<_, _>>()
        .expect("Invalid compiled-in CIDR block")
});

/// Cap on sequential addresses emitted per block when no sample size is given
const SEQUENTIAL_CAP: u32 = 1000;

/// Discovery breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    #[default]
    Small,
    Medium,
    Large,
}

impl DiscoveryMode {
    /// Addresses drawn from each block
    pub fn samples_per_block(&self) -> usize {
        match self {
            DiscoveryMode::Small => 50,
            DiscoveryMode::Medium => 200,
            DiscoveryMode::Large => 1000,
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMode::Small => write!(f, "small"),
            DiscoveryMode::Medium => write!(f, "medium"),
            DiscoveryMode::Large => write!(f, "large"),
        }
    }
}

impl FromStr for DiscoveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" | "quick" => Ok(DiscoveryMode::Small),
            "medium" | "normal" => Ok(DiscoveryMode::Medium),
            "large" | "full" => Ok(DiscoveryMode::Large),
            _ => Err(anyhow::anyhow!(
                "Invalid discovery mode: {}. Use: small, medium, large",
                s
            )),
        }
    }
}

/// First address and size of the sampling range `[start, start + count)`.
///
/// `count` is `broadcast - network`, so the broadcast address itself is
/// never drawn while the network address is.
pub fn block_span(block: &Ipv4Net) -> (u32, u32) {
    let start = u32::from(block.network());
    let end = u32::from(block.broadcast());
    (start, end - start)
}

/// Derives candidate IPv4 addresses from a list of CIDR blocks
#[derive(Debug, Clone)]
pub struct AddressSampler {
    blocks: Vec<Ipv4Net>,
}

impl AddressSampler {
    pub fn new(blocks: Vec<Ipv4Net>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Ipv4Net] {
        &self.blocks
    }

    /// Sample `per_block` addresses from every block using the thread RNG
    pub fn sample(&self, per_block: usize) -> Vec<Ipv4Addr> {
        self.sample_with(per_block, &mut rand::thread_rng())
    }

    /// Sample with a caller-provided RNG.
    ///
    /// With `per_block == 0` each block yields up to 1000 sequential
    /// addresses from its start instead of random draws. Output keeps
    /// block order.
    pub fn sample_with<R: Rng>(&self, per_block: usize, rng: &mut R) -> Vec<Ipv4Addr> {
        let mut addresses = Vec::new();

        for block in &self.blocks {
            let (start, count) = block_span(block);

            if per_block > 0 {
                addresses.reserve(per_block);
                for _ in 0..per_block {
                    let offset = if count == 0 { 0 } else { rng.gen_range(0..count) };
                    addresses.push(Ipv4Addr::from(start + offset));
                }
            } else {
                let limit = count.min(SEQUENTIAL_CAP);
                addresses.extend((0..limit).map(|offset| Ipv4Addr::from(start + offset)));
            }
        }

        addresses
    }
}

impl Default for AddressSampler {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKS.clone())
    }
}
