//! Common types and utilities for the mobilityd IP allocator

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub mod network;
pub mod protocol;

pub use network::{AddressBlock, AddressFamily};

/// Seconds a released address stays in cooling-down before it can be reissued
pub const DEFAULT_IP_RECYCLE_INTERVAL: u64 = 15;

/// Lower bound for the background sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// An active association between a subscriber and one allocated address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpLease {
    /// Subscriber identifier (e.g. "IMSI001010000000001")
    pub sid: String,
    /// Allocated address
    pub ip: IpAddr,
    /// Address family of the lease
    pub family: AddressFamily,
    /// Block the address was drawn from
    pub block: AddressBlock,
    /// Context tag (APN) supplied with the allocation request
    pub apn: Option<String>,
    /// When the lease was granted
    pub allocated_at: chrono::DateTime<chrono::Utc>,
}

impl IpLease {
    /// Project the lease onto a subscriber table row
    pub fn to_table_entry(&self) -> SubscriberIpEntry {
        SubscriberIpEntry {
            sid: self.sid.clone(),
            ip: self.ip,
            apn: self.apn.clone().unwrap_or_default(),
        }
    }
}

/// One row of the subscriber IP table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriberIpEntry {
    pub sid: String,
    pub ip: IpAddr,
    pub apn: String,
}

/// Per-block address accounting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockUsage {
    /// The block being described
    pub block: AddressBlock,
    /// Number of usable addresses in the block
    pub capacity: u128,
    /// Addresses that can be handed out right now
    pub free: u128,
    /// Addresses held by active leases
    pub allocated: usize,
    /// Released addresses waiting out the recycle interval
    pub cooling_down: usize,
}

/// Default gateway advertised to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayInfo {
    /// Gateway IP address
    pub ip: IpAddr,
    /// Gateway MAC address, empty when unknown
    pub mac: String,
}

impl GatewayInfo {
    /// Validate and build gateway information
    pub fn new(ip: IpAddr, mac: impl Into<String>) -> Result<Self> {
        if AddressFamily::of(&ip) != AddressFamily::Ipv4 {
            return Err(MobilityError::UnsupportedAddressFamily(format!(
                "gateway address {} is not IPv4",
                ip
            )));
        }

        let mac = mac.into();
        if !mac.is_empty() && !is_valid_mac(&mac) {
            return Err(MobilityError::InvalidAddressFormat(format!(
                "invalid MAC address: {}",
                mac
            )));
        }

        Ok(Self { ip, mac })
    }
}

/// Six hex octets joined by a single separator, either `:` or `-` throughout
fn is_valid_mac(mac: &str) -> bool {
    let Some(separator) = mac.chars().find(|c| *c == ':' || *c == '-') else {
        return false;
    };
    let octets: Vec<&str> = mac.split(separator).collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Allocator engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Seconds a released address cools down before reuse
    pub recycle_interval_secs: u64,
    /// Seconds between background recycling sweeps (defaults to the recycle interval)
    pub sweep_interval_secs: Option<u64>,
    /// CIDR blocks registered at startup
    pub ip_blocks: Vec<String>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            recycle_interval_secs: DEFAULT_IP_RECYCLE_INTERVAL,
            sweep_interval_secs: None,
            ip_blocks: Vec::new(),
        }
    }
}

impl AllocatorConfig {
    /// Minimum age of a released address before it returns to the free set
    pub fn recycle_interval(&self) -> Duration {
        Duration::from_secs(self.recycle_interval_secs)
    }

    /// Period of the background recycling sweep
    pub fn sweep_interval(&self) -> Duration {
        let secs = self.sweep_interval_secs.unwrap_or(self.recycle_interval_secs);
        Duration::from_secs(secs).max(MIN_SWEEP_INTERVAL)
    }

    /// Parse the configured startup blocks
    pub fn parse_ip_blocks(&self) -> Result<Vec<AddressBlock>> {
        self.ip_blocks.iter().map(|s| s.parse()).collect()
    }
}

/// mobilityd server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Allocator engine settings
    pub allocator: AllocatorConfig,
    /// Metrics configuration
    pub metrics_config: MetricsConfig,
    /// Log level
    pub log_level: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
    /// Prefix applied to every metric name
    pub metrics_prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_prefix: "mobilityd".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            allocator: AllocatorConfig::default(),
            metrics_config: MetricsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Caller-visible classification of a [`MobilityError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    OverlappingBlock,
    BlockNotFound,
    BlockInUse,
    PoolExhausted,
    DuplicateAllocation,
    NotAllocated,
    InvalidAddressFormat,
    UnsupportedAddressFamily,
    Config,
}

impl ErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::OverlappingBlock => "overlapping_block",
            ErrorKind::BlockNotFound => "block_not_found",
            ErrorKind::BlockInUse => "block_in_use",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::DuplicateAllocation => "duplicate_allocation",
            ErrorKind::NotAllocated => "not_allocated",
            ErrorKind::InvalidAddressFormat => "invalid_address_format",
            ErrorKind::UnsupportedAddressFamily => "unsupported_address_family",
            ErrorKind::Config => "config",
        }
    }
}

/// Error types for mobilityd operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MobilityError {
    /// The block intersects an already registered block
    #[error("IP block {block} overlaps with existing block {existing}")]
    OverlappingBlock {
        /// Block that was rejected
        block: AddressBlock,
        /// Registered block it collides with
        existing: AddressBlock,
    },

    /// The block is not registered
    #[error("IP block not found: {0}")]
    BlockNotFound(AddressBlock),

    /// The block still has active leases
    #[error("IP block {block} has {leases} active lease(s)")]
    BlockInUse {
        /// Block that was kept
        block: AddressBlock,
        /// Number of outstanding leases
        leases: usize,
    },

    /// No free address of the requested family
    #[error("No available {0} address")]
    PoolExhausted(AddressFamily),

    /// The subscriber already holds an address of this family
    #[error("Subscriber {sid} already holds address {ip}")]
    DuplicateAllocation {
        /// Subscriber identifier
        sid: String,
        /// Address of the existing lease
        ip: IpAddr,
    },

    /// No matching active lease
    #[error("IP address {0} is not allocated")]
    NotAllocated(IpAddr),

    /// Unparsable or non-canonical address or block
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    /// Operation not available for this address family
    #[error("Unsupported address family: {0}")]
    UnsupportedAddressFamily(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MobilityError {
    /// Classify the error for callers that branch on kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            MobilityError::OverlappingBlock { .. } => ErrorKind::OverlappingBlock,
            MobilityError::BlockNotFound(_) => ErrorKind::BlockNotFound,
            MobilityError::BlockInUse { .. } => ErrorKind::BlockInUse,
            MobilityError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            MobilityError::DuplicateAllocation { .. } => ErrorKind::DuplicateAllocation,
            MobilityError::NotAllocated(_) => ErrorKind::NotAllocated,
            MobilityError::InvalidAddressFormat(_) => ErrorKind::InvalidAddressFormat,
            MobilityError::UnsupportedAddressFamily(_) => ErrorKind::UnsupportedAddressFamily,
            MobilityError::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if the caller can recover from this error without a restart
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MobilityError::Config(_))
    }
}

/// Result type for mobilityd operations
pub type Result<T> = std::result::Result<T, MobilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert!(config.metrics_config.enabled);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.allocator.recycle_interval_secs, DEFAULT_IP_RECYCLE_INTERVAL);
        assert!(config.allocator.ip_blocks.is_empty());
    }

    #[test]
    fn test_sweep_interval_defaults_to_recycle_interval() {
        let config = AllocatorConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(15));

        let config = AllocatorConfig {
            recycle_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.recycle_interval(), Duration::ZERO);
        assert_eq!(config.sweep_interval(), MIN_SWEEP_INTERVAL);
    }

    #[test]
    fn test_parse_configured_blocks() {
        let config = AllocatorConfig {
            ip_blocks: vec!["10.0.0.0/24".to_string(), "192.168.0.0/16".to_string()],
            ..Default::default()
        };
        let blocks = config.parse_ip_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].to_string(), "10.0.0.0/24");

        let bad = AllocatorConfig {
            ip_blocks: vec!["10.0.0.0/33".to_string()],
            ..Default::default()
        };
        assert_eq!(
            bad.parse_ip_blocks().unwrap_err().kind(),
            ErrorKind::InvalidAddressFormat
        );
    }

    #[test]
    fn test_gateway_info_validation() {
        let gw = GatewayInfo::new("10.0.0.1".parse().unwrap(), "aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(gw.mac, "aa:bb:cc:dd:ee:ff");

        assert!(GatewayInfo::new("10.0.0.1".parse().unwrap(), "").is_ok());
        assert!(GatewayInfo::new("10.0.0.1".parse().unwrap(), "AA-BB-CC-DD-EE-FF").is_ok());

        let err = GatewayInfo::new("10.0.0.1".parse().unwrap(), "not-a-mac").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAddressFormat);

        for mac in ["aa:bb-cc:dd-ee:ff", "aa-bb:cc:dd:ee:ff", "aabbccddeeff"] {
            let err = GatewayInfo::new("10.0.0.1".parse().unwrap(), mac).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAddressFormat, "{}", mac);
        }

        let err = GatewayInfo::new("fe80::1".parse().unwrap(), "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAddressFamily);
    }

    #[test]
    fn test_error_kinds_are_recoverable() {
        let block: AddressBlock = "10.0.0.0/24".parse().unwrap();
        assert!(MobilityError::BlockNotFound(block).is_recoverable());
        assert!(MobilityError::PoolExhausted(AddressFamily::Ipv4).is_recoverable());
        assert!(!MobilityError::Config("bad".to_string()).is_recoverable());
        assert_eq!(ErrorKind::BlockInUse.as_str(), "block_in_use");
    }

    #[test]
    fn test_lease_serialization() {
        let lease = IpLease {
            sid: "IMSI001010000000001".to_string(),
            ip: "10.0.0.1".parse().unwrap(),
            family: AddressFamily::Ipv4,
            block: "10.0.0.0/24".parse().unwrap(),
            apn: Some("internet".to_string()),
            allocated_at: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&lease).unwrap();
        assert!(json.contains("\"10.0.0.0/24\""));
        assert!(json.contains("\"ipv4\""));
        let deserialized: IpLease = serde_json::from_str(&json).unwrap();
        assert_eq!(lease, deserialized);
        assert_eq!(deserialized.to_table_entry().apn, "internet");
    }
}
