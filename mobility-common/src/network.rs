//! Address blocks and address arithmetic

use crate::{MobilityError, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Family of the given address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Address width in bits
    pub fn bits(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    /// Length of the packed byte representation
    pub fn byte_len(&self) -> usize {
        usize::from(self.bits() / 8)
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("IPv4"),
            AddressFamily::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// Numeric value of an address
pub fn address_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Rebuild an address from its numeric value
///
/// IPv4 values are truncated to the low 32 bits.
pub fn address_from_u128(family: AddressFamily, value: u128) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Parse a textual IP address
pub fn parse_ip_address(s: &str) -> Result<IpAddr> {
    s.trim()
        .parse()
        .map_err(|_| MobilityError::InvalidAddressFormat(format!("invalid IP address: {}", s)))
}

/// A canonical CIDR block
///
/// Blocks order by network address, then prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    net: IpNetwork,
}

impl AddressBlock {
    /// Create a block from a network address and prefix length
    ///
    /// Rejects prefixes wider than the family and addresses with host bits set.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self> {
        let net = IpNetwork::new(network, prefix_len).map_err(|e| {
            MobilityError::InvalidAddressFormat(format!("{}/{}: {}", network, prefix_len, e))
        })?;

        if net.network() != network {
            return Err(MobilityError::InvalidAddressFormat(format!(
                "{}/{} has host bits set",
                network, prefix_len
            )));
        }

        Ok(Self { net })
    }

    /// Address family of the block
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.net.network())
    }

    /// Network address of the block
    pub fn network_address(&self) -> IpAddr {
        self.net.network()
    }

    /// Prefix length of the block
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix()
    }

    /// Inclusive numeric range of usable host addresses
    ///
    /// IPv4 drops the network and broadcast addresses except on /31 and /32.
    /// IPv6 drops only the subnet-router anycast address except on /127 and /128.
    pub fn host_range(&self) -> (u128, u128) {
        let first = address_to_u128(self.net.network());
        let last = address_to_u128(self.net.broadcast());
        let host_bits = self.family().bits() - self.prefix_len();
        match (self.family(), host_bits) {
            (_, 0) | (_, 1) => (first, last),
            (AddressFamily::Ipv4, _) => (first + 1, last - 1),
            (AddressFamily::Ipv6, _) => (first + 1, last),
        }
    }

    /// Number of usable host addresses
    ///
    /// Saturates at `u128::MAX` for an IPv6 /0.
    pub fn capacity(&self) -> u128 {
        let (first, last) = self.host_range();
        (last - first).saturating_add(1)
    }

    /// Whether the address lies anywhere inside the block
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.net.contains(*ip)
    }

    /// Whether the address is one the block can hand out
    pub fn is_usable(&self, ip: &IpAddr) -> bool {
        if !self.net.contains(*ip) {
            return false;
        }
        let (first, last) = self.host_range();
        let value = address_to_u128(*ip);
        value >= first && value <= last
    }

    /// Whether two blocks share any address
    ///
    /// CIDR blocks either nest or are disjoint, so checking both network
    /// addresses is enough.
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.net.contains(other.net.network()) || other.net.contains(self.net.network())
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.net.network(), self.net.prefix())
    }
}

impl FromStr for AddressBlock {
    type Err = MobilityError;

    fn from_str(s: &str) -> Result<Self> {
        let network = s
            .trim()
            .parse::<IpNetwork>()
            .map_err(|e| MobilityError::InvalidAddressFormat(format!("{}: {}", s, e)))?;

        Self::new(network.ip(), network.prefix())
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = MobilityError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_canonical_block() {
        let b = block("10.0.0.0/24");
        assert_eq!(b.family(), AddressFamily::Ipv4);
        assert_eq!(b.network_address(), ip("10.0.0.0"));
        assert_eq!(b.prefix_len(), 24);
        assert_eq!(b.to_string(), "10.0.0.0/24");

        // A bare address is a host route
        assert_eq!(block("10.0.0.7").to_string(), "10.0.0.7/32");
    }

    #[test]
    fn test_reject_malformed_blocks() {
        for bad in ["10.0.0.1/24", "10.0.0.0/33", "not-a-block", "2001:db8::1/64", "2001:db8::/129"] {
            let err = bad.parse::<AddressBlock>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAddressFormat, "{}", bad);
        }
    }

    #[test]
    fn test_ipv4_host_range() {
        let b = block("10.0.0.0/30");
        assert_eq!(b.capacity(), 2);
        assert!(!b.is_usable(&ip("10.0.0.0")));
        assert!(b.is_usable(&ip("10.0.0.1")));
        assert!(b.is_usable(&ip("10.0.0.2")));
        assert!(!b.is_usable(&ip("10.0.0.3")));
        assert!(b.contains(&ip("10.0.0.3")));

        assert_eq!(block("10.0.0.0/31").capacity(), 2);
        assert_eq!(block("10.0.0.5/32").capacity(), 1);
        assert_eq!(block("10.0.0.0/24").capacity(), 254);
    }

    #[test]
    fn test_ipv6_host_range() {
        let b = block("2001:db8::/126");
        assert_eq!(b.capacity(), 3);
        assert!(!b.is_usable(&ip("2001:db8::")));
        assert!(b.is_usable(&ip("2001:db8::3")));

        assert_eq!(block("2001:db8::/127").capacity(), 2);
        assert_eq!(block("::/0").capacity(), u128::MAX);
    }

    #[test]
    fn test_block_overlap() {
        assert!(block("10.0.0.0/24").overlaps(&block("10.0.0.128/25")));
        assert!(block("10.0.0.128/25").overlaps(&block("10.0.0.0/24")));
        assert!(block("10.0.0.0/8").overlaps(&block("10.1.1.0/24")));
        assert!(!block("192.168.1.0/24").overlaps(&block("192.168.2.0/24")));
        assert!(!block("0.0.0.0/0").overlaps(&block("::/0")));

        // Same network address, different prefix
        assert!(block("10.0.0.0/25").overlaps(&block("10.0.0.0/24")));
        assert!(block("2001:db8::/64").overlaps(&block("2001:db8::/48")));
        assert!(!block("2001:db8::/64").overlaps(&block("2001:db8:0:1::/64")));
    }

    #[test]
    fn test_new_rejects_host_bits() {
        assert!(AddressBlock::new(ip("10.0.0.0"), 24).is_ok());
        assert!(AddressBlock::new(ip("10.0.0.1"), 32).is_ok());
        assert_eq!(
            AddressBlock::new(ip("10.0.0.1"), 24).unwrap_err().kind(),
            ErrorKind::InvalidAddressFormat
        );
        assert_eq!(
            AddressBlock::new(ip("10.0.0.0"), 40).unwrap_err().kind(),
            ErrorKind::InvalidAddressFormat
        );
    }

    #[test]
    fn test_block_ordering() {
        let mut blocks = vec![block("192.168.0.0/16"), block("10.0.1.0/24"), block("10.0.0.0/24")];
        blocks.sort();
        let rendered: Vec<String> = blocks.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["10.0.0.0/24", "10.0.1.0/24", "192.168.0.0/16"]);
    }

    #[test]
    fn test_address_numeric_conversion() {
        let v4 = ip("10.0.0.1");
        assert_eq!(address_to_u128(v4), 0x0a00_0001);
        assert_eq!(address_from_u128(AddressFamily::Ipv4, 0x0a00_0001), v4);

        let v6 = ip("2001:db8::1");
        assert_eq!(address_from_u128(AddressFamily::Ipv6, address_to_u128(v6)), v6);

        assert!(parse_ip_address("10.0.0.300").is_err());
    }
}
