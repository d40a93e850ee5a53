//! Subscriber to address lease bookkeeping

use mobility_common::{AddressBlock, AddressFamily, IpLease, MobilityError, Result, SubscriberIpEntry};
use std::collections::HashMap;
use std::net::IpAddr;

type LeaseKey = (String, AddressFamily);

/// Active leases indexed by subscriber and by address
///
/// At most one lease exists per (subscriber, family) and every address
/// belongs to at most one lease.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    leases: HashMap<LeaseKey, IpLease>,
    owners: HashMap<IpAddr, LeaseKey>,
}

impl AllocationLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease held by a subscriber for a family
    pub fn lookup(&self, sid: &str, family: AddressFamily) -> Option<&IpLease> {
        self.leases.get(&(sid.to_string(), family))
    }

    /// Lease currently holding an address
    pub fn holder_of(&self, ip: &IpAddr) -> Option<&IpLease> {
        self.owners.get(ip).and_then(|key| self.leases.get(key))
    }

    /// Fail with `DuplicateAllocation` if the subscriber already holds a lease of this family
    pub fn ensure_vacant(&self, sid: &str, family: AddressFamily) -> Result<()> {
        match self.lookup(sid, family) {
            Some(lease) => Err(MobilityError::DuplicateAllocation {
                sid: sid.to_string(),
                ip: lease.ip,
            }),
            None => Ok(()),
        }
    }

    /// Record a new lease
    pub fn record(&mut self, lease: IpLease) -> Result<()> {
        self.ensure_vacant(&lease.sid, lease.family)?;
        if let Some(holder) = self.holder_of(&lease.ip) {
            return Err(MobilityError::DuplicateAllocation {
                sid: holder.sid.clone(),
                ip: lease.ip,
            });
        }

        let key = (lease.sid.clone(), lease.family);
        self.owners.insert(lease.ip, key.clone());
        self.leases.insert(key, lease);
        Ok(())
    }

    /// Lease matching a subscriber and address
    pub fn find(&self, sid: &str, ip: &IpAddr) -> Result<&IpLease> {
        self.lookup(sid, AddressFamily::of(ip))
            .filter(|lease| lease.ip == *ip)
            .ok_or(MobilityError::NotAllocated(*ip))
    }

    /// Remove the lease matching a subscriber and address
    pub fn remove(&mut self, sid: &str, ip: &IpAddr) -> Result<IpLease> {
        self.find(sid, ip)?;
        self.owners.remove(ip);
        self.leases
            .remove(&(sid.to_string(), AddressFamily::of(ip)))
            .ok_or(MobilityError::NotAllocated(*ip))
    }

    /// Remove every lease drawn from a block
    pub fn drain_block(&mut self, block: &AddressBlock) -> Vec<IpLease> {
        let keys: Vec<LeaseKey> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.block == *block)
            .map(|(key, _)| key.clone())
            .collect();

        let mut drained: Vec<IpLease> = keys
            .iter()
            .filter_map(|key| self.leases.remove(key))
            .collect();
        for lease in &drained {
            self.owners.remove(&lease.ip);
        }
        drained.sort_by_key(|lease| lease.ip);
        drained
    }

    /// Addresses leased from a block, ascending
    pub fn allocated_in(&self, block: &AddressBlock) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self
            .leases
            .values()
            .filter(|lease| lease.block == *block)
            .map(|lease| lease.ip)
            .collect();
        ips.sort();
        ips
    }

    /// Number of leases drawn from a block
    pub fn count_in(&self, block: &AddressBlock) -> usize {
        self.leases.values().filter(|lease| lease.block == *block).count()
    }

    /// Every lease as a subscriber table row, sorted by subscriber then address
    pub fn subscriber_table(&self) -> Vec<SubscriberIpEntry> {
        let mut entries: Vec<SubscriberIpEntry> =
            self.leases.values().map(IpLease::to_table_entry).collect();
        entries.sort_by(|a, b| a.sid.cmp(&b.sid).then(a.ip.cmp(&b.ip)));
        entries
    }

    /// Number of active leases
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether there are no active leases
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(sid: &str, ip: &str, block: &str) -> IpLease {
        let ip: IpAddr = ip.parse().unwrap();
        IpLease {
            sid: sid.to_string(),
            ip,
            family: AddressFamily::of(&ip),
            block: block.parse().unwrap(),
            apn: None,
            allocated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_one_lease_per_subscriber_and_family() {
        let mut ledger = AllocationLedger::new();
        ledger.record(lease("IMSI1", "10.0.0.1", "10.0.0.0/24")).unwrap();

        let err = ledger
            .record(lease("IMSI1", "10.0.0.2", "10.0.0.0/24"))
            .unwrap_err();
        assert_eq!(
            err,
            MobilityError::DuplicateAllocation {
                sid: "IMSI1".to_string(),
                ip: "10.0.0.1".parse().unwrap(),
            }
        );

        // Another family is a separate dimension
        ledger
            .record(lease("IMSI1", "2001:db8::1", "2001:db8::/64"))
            .unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_address_has_single_owner() {
        let mut ledger = AllocationLedger::new();
        ledger.record(lease("IMSI1", "10.0.0.1", "10.0.0.0/24")).unwrap();
        assert!(ledger.record(lease("IMSI2", "10.0.0.1", "10.0.0.0/24")).is_err());
        assert_eq!(
            ledger.holder_of(&"10.0.0.1".parse().unwrap()).unwrap().sid,
            "IMSI1"
        );
    }

    #[test]
    fn test_remove_requires_matching_pair() {
        let mut ledger = AllocationLedger::new();
        ledger.record(lease("IMSI1", "10.0.0.1", "10.0.0.0/24")).unwrap();

        let wrong_ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(
            ledger.remove("IMSI1", &wrong_ip).unwrap_err(),
            MobilityError::NotAllocated(wrong_ip)
        );
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(ledger.remove("IMSI2", &ip).is_err());
        assert_eq!(ledger.len(), 1);

        let removed = ledger.remove("IMSI1", &ip).unwrap();
        assert_eq!(removed.ip, ip);
        assert!(ledger.is_empty());
        assert!(ledger.holder_of(&ip).is_none());
    }

    #[test]
    fn test_block_views() {
        let mut ledger = AllocationLedger::new();
        ledger.record(lease("IMSI2", "10.0.0.2", "10.0.0.0/24")).unwrap();
        ledger.record(lease("IMSI1", "10.0.0.1", "10.0.0.0/24")).unwrap();
        ledger.record(lease("IMSI3", "10.1.0.1", "10.1.0.0/24")).unwrap();

        let block: AddressBlock = "10.0.0.0/24".parse().unwrap();
        let ips: Vec<String> = ledger.allocated_in(&block).iter().map(ToString::to_string).collect();
        assert_eq!(ips, ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(ledger.count_in(&block), 2);

        let table = ledger.subscriber_table();
        let sids: Vec<&str> = table.iter().map(|e| e.sid.as_str()).collect();
        assert_eq!(sids, ["IMSI1", "IMSI2", "IMSI3"]);

        let drained = ledger.drain_block(&block);
        assert_eq!(drained.len(), 2);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.lookup("IMSI1", AddressFamily::Ipv4).is_none());
        assert!(ledger.holder_of(&"10.0.0.1".parse().unwrap()).is_none());
    }
}
