//! Allocator state shared behind the facade lock

use crate::ledger::AllocationLedger;
use crate::pool::{AddressState, FreeAddressTracker};
use crate::registry::BlockRegistry;
use mobility_common::{
    AddressBlock, AddressFamily, BlockUsage, IpLease, MobilityError, Result, SubscriberIpEntry,
};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Registry, tracker and ledger kept consistent with each other
///
/// Every method is a complete state transition: on error nothing changes.
#[derive(Debug)]
pub struct IpamState {
    registry: BlockRegistry,
    tracker: FreeAddressTracker,
    ledger: AllocationLedger,
}

impl IpamState {
    /// Create an empty allocator state
    pub fn new(recycle_interval: Duration) -> Self {
        Self {
            registry: BlockRegistry::new(),
            tracker: FreeAddressTracker::new(recycle_interval),
            ledger: AllocationLedger::new(),
        }
    }

    /// Register a block and start tracking its addresses
    pub fn add_ip_block(&mut self, block: AddressBlock) -> Result<()> {
        self.registry.add(block)?;
        self.tracker.add_block(block);
        info!(block = %block, capacity = %block.capacity(), "Added IP block");
        Ok(())
    }

    /// Remove one block, returning how many leases were terminated
    pub fn remove_ip_block(&mut self, block: &AddressBlock, force: bool) -> Result<usize> {
        self.registry.ensure_registered(block)?;

        let leases = self.ledger.count_in(block);
        if leases > 0 && !force {
            return Err(MobilityError::BlockInUse {
                block: *block,
                leases,
            });
        }

        let terminated = self.ledger.drain_block(block);
        for lease in &terminated {
            info!(sid = %lease.sid, ip = %lease.ip, block = %block, "Terminated lease on forced block removal");
        }
        self.tracker.discard_block(block);
        self.registry.remove(block)?;

        info!(block = %block, force, terminated = terminated.len(), "Removed IP block");
        Ok(terminated.len())
    }

    /// Remove several blocks independently
    ///
    /// Rejected blocks are skipped. Fails only when every requested block was
    /// rejected, with the first rejection.
    pub fn remove_ip_blocks(&mut self, blocks: &[AddressBlock], force: bool) -> Result<Vec<AddressBlock>> {
        let mut removed = Vec::with_capacity(blocks.len());
        let mut first_error = None;

        for block in blocks {
            match self.remove_ip_block(block, force) {
                Ok(_) => removed.push(*block),
                Err(e) => {
                    warn!(block = %block, error = %e, "Skipping IP block removal");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if removed.is_empty() => Err(e),
            _ => Ok(removed),
        }
    }

    /// Registered blocks in registry order
    pub fn list_added_ip_blocks(&self) -> Vec<AddressBlock> {
        self.registry.iter().copied().collect()
    }

    /// Addresses currently leased from a block
    pub fn list_allocated_ips(&self, block: &AddressBlock) -> Result<Vec<IpAddr>> {
        self.registry.ensure_registered(block)?;
        Ok(self.ledger.allocated_in(block))
    }

    /// Lease an address of the requested family to a subscriber
    ///
    /// Blocks are tried in registry order; the first with a free address wins.
    pub fn allocate(&mut self, sid: &str, family: AddressFamily, apn: Option<String>) -> Result<IpLease> {
        self.ledger.ensure_vacant(sid, family)?;

        let candidates: Vec<AddressBlock> = self.registry.blocks_of(family).copied().collect();
        for block in candidates {
            let ip = match self.tracker.next_free(&block) {
                Ok(ip) => ip,
                Err(MobilityError::PoolExhausted(_)) => continue,
                Err(e) => return Err(e),
            };

            let lease = IpLease {
                sid: sid.to_string(),
                ip,
                family,
                block,
                apn,
                allocated_at: chrono::Utc::now(),
            };
            if let Err(e) = self.ledger.record(lease.clone()) {
                self.tracker.restore(&block, ip)?;
                return Err(e);
            }

            info!(sid = %sid, ip = %ip, block = %block, "Allocated IP address");
            return Ok(lease);
        }

        Err(MobilityError::PoolExhausted(family))
    }

    /// End a subscriber's lease and start the address cooling down
    pub fn release(&mut self, sid: &str, ip: IpAddr, now: Instant) -> Result<IpLease> {
        let block = self.ledger.find(sid, &ip)?.block;
        self.tracker.release(&block, ip, now)?;
        let lease = self.ledger.remove(sid, &ip)?;

        info!(sid = %sid, ip = %ip, block = %block, "Released IP address");
        Ok(lease)
    }

    /// Lease held by a subscriber for a family
    pub fn lookup_by_subscriber(&self, sid: &str, family: AddressFamily) -> Option<&IpLease> {
        self.ledger.lookup(sid, family)
    }

    /// All active leases as table rows
    pub fn subscriber_table(&self) -> Vec<SubscriberIpEntry> {
        self.ledger.subscriber_table()
    }

    /// Usage counters for every registered block
    pub fn block_usage(&self) -> Vec<BlockUsage> {
        self.tracker.usage()
    }

    /// Return cooled-down addresses to the free sets
    pub fn recycle(&mut self, now: Instant) -> usize {
        self.tracker.recycle(now)
    }

    /// State of an address in whichever registered block holds it
    pub fn address_state(&self, ip: &IpAddr) -> Option<AddressState> {
        let block = self.registry.find_containing(ip)?;
        self.tracker.pool(&block)?.state_of(ip)
    }

    /// Minimum cooling-down time before reuse
    pub fn recycle_interval(&self) -> Duration {
        self.tracker.recycle_interval()
    }
}
