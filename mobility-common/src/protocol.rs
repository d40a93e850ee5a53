//! Wire protocol for the mobilityd RPC surface
//!
//! Addresses travel as a version tag plus packed bytes (4 for IPv4, 16 for
//! IPv6), blocks as version, packed network address and prefix length. Byte
//! fields are base64 encoded in JSON.

use crate::network::{AddressBlock, AddressFamily};
use crate::{ErrorKind, GatewayInfo, MobilityError, Result, SubscriberIpEntry};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// API version
pub const API_VERSION: &str = "v1";

/// Base path for the RPC API
pub const API_BASE_PATH: &str = "/api/v1";

/// RPC endpoints
pub mod endpoints {
    use super::API_BASE_PATH;

    /// AddIPBlock
    pub const ADD_IP_BLOCK: &str = const_format::concatcp!(API_BASE_PATH, "/ip-blocks");

    /// RemoveIPBlock
    pub const REMOVE_IP_BLOCK: &str = const_format::concatcp!(API_BASE_PATH, "/ip-blocks/remove");

    /// ListAddedIPv4Blocks
    pub const LIST_IPV4_BLOCKS: &str = const_format::concatcp!(API_BASE_PATH, "/ip-blocks/ipv4");

    /// AllocateIPAddress
    pub const ALLOCATE_IP: &str = const_format::concatcp!(API_BASE_PATH, "/ips/allocate");

    /// ReleaseIPAddress
    pub const RELEASE_IP: &str = const_format::concatcp!(API_BASE_PATH, "/ips/release");

    /// ListAllocatedIPs
    pub const LIST_ALLOCATED_IPS: &str = const_format::concatcp!(API_BASE_PATH, "/ips/list");

    /// GetSubscriberIPTable
    pub const SUBSCRIBER_IP_TABLE: &str = const_format::concatcp!(API_BASE_PATH, "/subscribers");

    /// GetGatewayInfo / SetGatewayInfo
    pub const GATEWAY_INFO: &str = const_format::concatcp!(API_BASE_PATH, "/gateway");

    /// Health check endpoint
    pub const HEALTH: &str = "/health";

    /// Metrics endpoint (Prometheus format)
    pub const METRICS: &str = "/metrics";
}

/// HTTP response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Success status
    pub success: bool,
    /// Response data
    pub data: Option<T>,
    /// Error message if any
    pub error: Option<String>,
    /// Error classification if any
    pub error_kind: Option<ErrorKind>,
    /// Response timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an error response
    pub fn error(err: &MobilityError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Address family tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "IPV4")]
    Ipv4,
    #[serde(rename = "IPV6")]
    Ipv6,
}

impl From<AddressFamily> for IpVersion {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => IpVersion::Ipv4,
            AddressFamily::Ipv6 => IpVersion::Ipv6,
        }
    }
}

impl From<IpVersion> for AddressFamily {
    fn from(version: IpVersion) -> Self {
        match version {
            IpVersion::Ipv4 => AddressFamily::Ipv4,
            IpVersion::Ipv6 => AddressFamily::Ipv6,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn unpack_address(version: IpVersion, bytes: &[u8]) -> Result<IpAddr> {
    let family = AddressFamily::from(version);
    if bytes.len() != family.byte_len() {
        return Err(MobilityError::InvalidAddressFormat(format!(
            "{} address must be {} bytes, got {}",
            family,
            family.byte_len(),
            bytes.len()
        )));
    }

    Ok(match family {
        AddressFamily::Ipv4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        AddressFamily::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    })
}

fn pack_address(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// An IP address on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressMsg {
    pub version: IpVersion,
    #[serde(with = "base64_bytes")]
    pub address: Vec<u8>,
}

impl From<IpAddr> for IpAddressMsg {
    fn from(ip: IpAddr) -> Self {
        Self {
            version: AddressFamily::of(&ip).into(),
            address: pack_address(ip),
        }
    }
}

impl TryFrom<&IpAddressMsg> for IpAddr {
    type Error = MobilityError;

    fn try_from(msg: &IpAddressMsg) -> Result<Self> {
        unpack_address(msg.version, &msg.address)
    }
}

/// A CIDR block on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlockMsg {
    pub version: IpVersion,
    #[serde(with = "base64_bytes")]
    pub net_address: Vec<u8>,
    pub prefix_len: u32,
}

impl From<AddressBlock> for IpBlockMsg {
    fn from(block: AddressBlock) -> Self {
        Self {
            version: block.family().into(),
            net_address: pack_address(block.network_address()),
            prefix_len: u32::from(block.prefix_len()),
        }
    }
}

impl TryFrom<&IpBlockMsg> for AddressBlock {
    type Error = MobilityError;

    fn try_from(msg: &IpBlockMsg) -> Result<Self> {
        let network = unpack_address(msg.version, &msg.net_address)?;
        let prefix_len = u8::try_from(msg.prefix_len).map_err(|_| {
            MobilityError::InvalidAddressFormat(format!("invalid prefix length {}", msg.prefix_len))
        })?;
        AddressBlock::new(network, prefix_len)
    }
}

/// RemoveIPBlock request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveIpBlockRequest {
    pub ip_blocks: Vec<IpBlockMsg>,
    #[serde(default)]
    pub force: bool,
}

/// RemoveIPBlock response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveIpBlockResponse {
    pub ip_blocks: Vec<IpBlockMsg>,
}

/// ListAddedIPv4Blocks response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAddedIpBlocksResponse {
    pub ip_block_list: Vec<IpBlockMsg>,
}

/// AllocateIPAddress request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateIpRequest {
    pub sid: String,
    pub version: IpVersion,
    #[serde(default)]
    pub apn: String,
}

/// ReleaseIPAddress request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseIpRequest {
    pub sid: String,
    pub ip: IpAddressMsg,
}

/// ListAllocatedIPs response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAllocatedIpsResponse {
    pub ip_list: Vec<IpAddressMsg>,
}

/// One GetSubscriberIPTable row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberIpTableEntry {
    pub sid: String,
    pub ip: IpAddressMsg,
    pub apn: String,
}

impl From<SubscriberIpEntry> for SubscriberIpTableEntry {
    fn from(entry: SubscriberIpEntry) -> Self {
        Self {
            sid: entry.sid,
            ip: entry.ip.into(),
            apn: entry.apn,
        }
    }
}

/// GetSubscriberIPTable response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberIpTable {
    pub entries: Vec<SubscriberIpTableEntry>,
}

/// Gateway information on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GwInfo {
    pub ip: IpAddressMsg,
    #[serde(default)]
    pub mac: String,
}

impl From<GatewayInfo> for GwInfo {
    fn from(info: GatewayInfo) -> Self {
        Self {
            ip: info.ip.into(),
            mac: info.mac,
        }
    }
}

impl TryFrom<&GwInfo> for GatewayInfo {
    type Error = MobilityError;

    fn try_from(msg: &GwInfo) -> Result<Self> {
        let ip = IpAddr::try_from(&msg.ip)?;
        GatewayInfo::new(ip, msg.mac.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response() {
        let success_response = ApiResponse::success("test data");
        assert!(success_response.success);
        assert_eq!(success_response.data, Some("test data"));
        assert!(success_response.error.is_none());

        let err = MobilityError::PoolExhausted(AddressFamily::Ipv4);
        let error_response: ApiResponse<String> = ApiResponse::error(&err);
        assert!(!error_response.success);
        assert!(error_response.data.is_none());
        assert_eq!(error_response.error_kind, Some(ErrorKind::PoolExhausted));
        assert_eq!(error_response.error, Some("No available IPv4 address".to_string()));
    }

    #[test]
    fn test_address_message_encoding() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let msg = IpAddressMsg::from(ip);
        assert_eq!(msg.version, IpVersion::Ipv4);
        assert_eq!(msg.address, vec![10, 0, 0, 1]);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["version"], "IPV4");
        assert_eq!(json["address"], "CgAAAQ==");

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(IpAddressMsg::from(v6).address.len(), 16);
    }

    #[test]
    fn test_address_length_mismatch_is_rejected() {
        let msg = IpAddressMsg {
            version: IpVersion::Ipv6,
            address: vec![10, 0, 0, 1],
        };
        let err = IpAddr::try_from(&msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAddressFormat);
    }

    #[test]
    fn test_block_message_decoding() {
        let msg = IpBlockMsg {
            version: IpVersion::Ipv4,
            net_address: vec![10, 0, 0, 0],
            prefix_len: 24,
        };
        let block = AddressBlock::try_from(&msg).unwrap();
        assert_eq!(block.to_string(), "10.0.0.0/24");
        assert_eq!(IpBlockMsg::from(block), msg);

        let host_bits = IpBlockMsg {
            net_address: vec![10, 0, 0, 1],
            ..msg.clone()
        };
        assert!(AddressBlock::try_from(&host_bits).is_err());

        let huge_prefix = IpBlockMsg {
            prefix_len: 300,
            ..msg
        };
        assert!(AddressBlock::try_from(&huge_prefix).is_err());
    }

    #[test]
    fn test_gateway_message_validation() {
        let msg = GwInfo {
            ip: "192.168.128.1".parse::<IpAddr>().unwrap().into(),
            mac: "0e:ab:cd:01:02:03".to_string(),
        };
        let info = GatewayInfo::try_from(&msg).unwrap();
        assert_eq!(info.ip.to_string(), "192.168.128.1");

        let bad = GwInfo {
            mac: "zz".to_string(),
            ..msg
        };
        assert!(GatewayInfo::try_from(&bad).is_err());
    }

    #[test]
    fn test_allocate_request_defaults() {
        let request: AllocateIpRequest =
            serde_json::from_str(r#"{"sid": "IMSI1", "version": "IPV4"}"#).unwrap();
        assert_eq!(request.apn, "");
        assert_eq!(AddressFamily::from(request.version), AddressFamily::Ipv4);
    }
}
