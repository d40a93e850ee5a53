//! Free-address tracking with delayed recycling

use mobility_common::network::{address_from_u128, address_to_u128};
use mobility_common::{AddressBlock, BlockUsage, MobilityError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle state of one usable address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    /// Can be handed out
    Free,
    /// Held by an active lease
    Allocated,
    /// Released, waiting out the recycle interval
    CoolingDown,
}

/// Address accounting for a single block
///
/// The free set is the never-issued tail starting at `cursor` plus the
/// `reclaimed` addresses, so a block costs nothing until it is used.
#[derive(Debug, Clone)]
pub struct BlockPool {
    block: AddressBlock,
    first: u128,
    last: u128,
    cursor: Option<u128>,
    reclaimed: BTreeSet<u128>,
    allocated: BTreeSet<u128>,
    cooling: BTreeMap<u128, Instant>,
}

impl BlockPool {
    /// Create a pool with every usable address free
    pub fn new(block: AddressBlock) -> Self {
        let (first, last) = block.host_range();
        Self {
            block,
            first,
            last,
            cursor: Some(first),
            reclaimed: BTreeSet::new(),
            allocated: BTreeSet::new(),
            cooling: BTreeMap::new(),
        }
    }

    /// The block this pool covers
    pub fn block(&self) -> &AddressBlock {
        &self.block
    }

    fn is_free(&self, value: u128) -> bool {
        self.reclaimed.contains(&value) || self.cursor.is_some_and(|c| value >= c)
    }

    /// Take the lowest free address
    pub fn next_free(&mut self) -> Result<IpAddr> {
        let reclaimed = self.reclaimed.first().copied();
        let value = match (reclaimed, self.cursor) {
            (Some(r), Some(c)) if r < c => self.reclaimed.pop_first(),
            (_, Some(c)) => {
                self.cursor = if c == self.last { None } else { Some(c + 1) };
                Some(c)
            }
            (Some(_), None) => self.reclaimed.pop_first(),
            (None, None) => None,
        }
        .ok_or(MobilityError::PoolExhausted(self.block.family()))?;

        self.allocated.insert(value);
        Ok(address_from_u128(self.block.family(), value))
    }

    /// Move an allocated address into cooling-down
    pub fn release(&mut self, ip: IpAddr, now: Instant) -> Result<()> {
        if !self.block.is_usable(&ip) || !self.allocated.remove(&address_to_u128(ip)) {
            return Err(MobilityError::NotAllocated(ip));
        }
        self.cooling.insert(address_to_u128(ip), now);
        Ok(())
    }

    /// Put back an address taken by `next_free` that never reached a subscriber
    ///
    /// The address skips cooling-down and is the next one handed out.
    pub fn restore(&mut self, ip: IpAddr) -> Result<()> {
        let value = address_to_u128(ip);
        if !self.block.is_usable(&ip) || !self.allocated.remove(&value) {
            return Err(MobilityError::NotAllocated(ip));
        }
        self.reclaimed.insert(value);
        Ok(())
    }

    /// Return addresses that have cooled down for at least `interval`
    ///
    /// Entries that are out of range or already tracked elsewhere are logged
    /// and dropped; the rest of the sweep carries on.
    pub fn recycle(&mut self, now: Instant, interval: Duration) -> usize {
        let expired: Vec<u128> = self
            .cooling
            .iter()
            .filter(|(_, released_at)| now.saturating_duration_since(**released_at) >= interval)
            .map(|(value, _)| *value)
            .collect();

        let mut recycled = 0;
        for value in expired {
            self.cooling.remove(&value);
            let ip = address_from_u128(self.block.family(), value);

            if value < self.first || value > self.last {
                warn!(block = %self.block, ip = %ip, "Dropping cooling address outside block");
                continue;
            }
            if self.allocated.contains(&value) || self.is_free(value) {
                warn!(block = %self.block, ip = %ip, "Dropping cooling address tracked in another state");
                continue;
            }

            self.reclaimed.insert(value);
            recycled += 1;
        }

        if recycled > 0 {
            debug!(block = %self.block, recycled, "Recycled addresses");
        }
        recycled
    }

    /// Current state of an address, `None` if the block cannot issue it
    pub fn state_of(&self, ip: &IpAddr) -> Option<AddressState> {
        if !self.block.is_usable(ip) {
            return None;
        }
        let value = address_to_u128(*ip);
        if self.allocated.contains(&value) {
            Some(AddressState::Allocated)
        } else if self.cooling.contains_key(&value) {
            Some(AddressState::CoolingDown)
        } else {
            Some(AddressState::Free)
        }
    }

    /// Number of free addresses
    pub fn free_count(&self) -> u128 {
        let tail = self.cursor.map_or(0, |c| (self.last - c).saturating_add(1));
        tail.saturating_add(self.reclaimed.len() as u128)
    }

    /// Number of allocated addresses
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    /// Number of cooling-down addresses
    pub fn cooling_count(&self) -> usize {
        self.cooling.len()
    }

    /// Snapshot of the pool counters
    pub fn usage(&self) -> BlockUsage {
        BlockUsage {
            block: self.block,
            capacity: self.block.capacity(),
            free: self.free_count(),
            allocated: self.allocated_count(),
            cooling_down: self.cooling_count(),
        }
    }
}

/// Per-block pools for every registered block
#[derive(Debug)]
pub struct FreeAddressTracker {
    pools: BTreeMap<AddressBlock, BlockPool>,
    recycle_interval: Duration,
}

impl FreeAddressTracker {
    /// Create a tracker with the given recycle interval
    pub fn new(recycle_interval: Duration) -> Self {
        Self {
            pools: BTreeMap::new(),
            recycle_interval,
        }
    }

    /// Minimum cooling-down time before reuse
    pub fn recycle_interval(&self) -> Duration {
        self.recycle_interval
    }

    /// Start tracking a block
    pub fn add_block(&mut self, block: AddressBlock) {
        self.pools.entry(block).or_insert_with(|| BlockPool::new(block));
    }

    /// Stop tracking a block, dropping all of its state
    pub fn discard_block(&mut self, block: &AddressBlock) -> Option<BlockPool> {
        self.pools.remove(block)
    }

    /// Pool for a block
    pub fn pool(&self, block: &AddressBlock) -> Option<&BlockPool> {
        self.pools.get(block)
    }

    fn pool_mut(&mut self, block: &AddressBlock) -> Result<&mut BlockPool> {
        self.pools
            .get_mut(block)
            .ok_or(MobilityError::BlockNotFound(*block))
    }

    /// Take the lowest free address of a block
    pub fn next_free(&mut self, block: &AddressBlock) -> Result<IpAddr> {
        self.pool_mut(block)?.next_free()
    }

    /// Release an address of a block into cooling-down
    pub fn release(&mut self, block: &AddressBlock, ip: IpAddr, now: Instant) -> Result<()> {
        self.pool_mut(block)?.release(ip, now)
    }

    /// Put back an unleased address of a block
    pub fn restore(&mut self, block: &AddressBlock, ip: IpAddr) -> Result<()> {
        self.pool_mut(block)?.restore(ip)
    }

    /// Sweep every block for addresses past the recycle interval
    pub fn recycle(&mut self, now: Instant) -> usize {
        let interval = self.recycle_interval;
        self.pools
            .values_mut()
            .map(|pool| pool.recycle(now, interval))
            .sum()
    }

    /// Usage counters for every tracked block
    pub fn usage(&self) -> Vec<BlockUsage> {
        self.pools.values().map(BlockPool::usage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobility_common::ErrorKind;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_lowest_first_allocation() {
        let mut pool = BlockPool::new(block("10.0.0.0/30"));
        assert_eq!(pool.free_count(), 2);

        assert_eq!(pool.next_free().unwrap(), ip("10.0.0.1"));
        assert_eq!(pool.next_free().unwrap(), ip("10.0.0.2"));
        assert_eq!(pool.free_count(), 0);
        assert_eq!(
            pool.next_free().unwrap_err().kind(),
            ErrorKind::PoolExhausted
        );
    }

    #[test]
    fn test_released_address_cools_down() {
        let mut pool = BlockPool::new(block("10.0.0.0/30"));
        let first = pool.next_free().unwrap();
        pool.next_free().unwrap();

        let released_at = Instant::now();
        pool.release(first, released_at).unwrap();
        assert_eq!(pool.state_of(&first), Some(AddressState::CoolingDown));
        assert!(pool.next_free().is_err());

        let interval = Duration::from_secs(15);
        assert_eq!(pool.recycle(released_at + Duration::from_secs(10), interval), 0);
        assert!(pool.next_free().is_err());

        assert_eq!(pool.recycle(released_at + Duration::from_secs(16), interval), 1);
        assert_eq!(pool.state_of(&first), Some(AddressState::Free));
        assert_eq!(pool.next_free().unwrap(), first);
    }

    #[test]
    fn test_restore_skips_cooling_down() {
        let mut pool = BlockPool::new(block("10.0.0.0/29"));
        let first = pool.next_free().unwrap();
        pool.next_free().unwrap();

        pool.restore(first).unwrap();
        assert_eq!(pool.state_of(&first), Some(AddressState::Free));
        assert_eq!(pool.cooling_count(), 0);
        assert_eq!(pool.next_free().unwrap(), first);

        assert!(pool.restore(ip("10.0.0.5")).is_err());
    }

    #[test]
    fn test_reclaimed_address_preferred_when_lower() {
        let mut pool = BlockPool::new(block("10.0.0.0/29"));
        let a = pool.next_free().unwrap();
        let b = pool.next_free().unwrap();
        assert_eq!((a, b), (ip("10.0.0.1"), ip("10.0.0.2")));

        let now = Instant::now();
        pool.release(a, now).unwrap();
        pool.recycle(now, Duration::ZERO);

        assert_eq!(pool.next_free().unwrap(), ip("10.0.0.1"));
        assert_eq!(pool.next_free().unwrap(), ip("10.0.0.3"));
    }

    #[test]
    fn test_release_of_unallocated_address_fails() {
        let mut pool = BlockPool::new(block("10.0.0.0/30"));
        let now = Instant::now();

        assert_eq!(
            pool.release(ip("10.0.0.1"), now).unwrap_err(),
            MobilityError::NotAllocated(ip("10.0.0.1"))
        );
        // Broadcast address is never issued
        assert!(pool.release(ip("10.0.0.3"), now).is_err());
        assert_eq!(pool.state_of(&ip("10.0.0.3")), None);

        let a = pool.next_free().unwrap();
        pool.release(a, now).unwrap();
        assert!(pool.release(a, now).is_err());
        assert_eq!(pool.cooling_count(), 1);
    }

    #[test]
    fn test_states_are_disjoint() {
        let mut pool = BlockPool::new(block("10.0.0.0/28"));
        let now = Instant::now();
        let issued: Vec<IpAddr> = (0..6).map(|_| pool.next_free().unwrap()).collect();
        for addr in &issued[..3] {
            pool.release(*addr, now).unwrap();
        }
        pool.recycle(now + Duration::from_secs(20), Duration::from_secs(15));
        pool.next_free().unwrap();

        let mut free = 0u128;
        let mut allocated = 0;
        let mut cooling = 0;
        for n in 1..=14u8 {
            match pool.state_of(&ip(&format!("10.0.0.{}", n))).unwrap() {
                AddressState::Free => free += 1,
                AddressState::Allocated => allocated += 1,
                AddressState::CoolingDown => cooling += 1,
            }
        }
        assert_eq!(free, pool.free_count());
        assert_eq!(allocated, pool.allocated_count());
        assert_eq!(cooling, pool.cooling_count());
        assert_eq!(free + allocated as u128 + cooling as u128, pool.usage().capacity);
    }

    #[test]
    fn test_sweep_drops_anomalous_entries() {
        let mut pool = BlockPool::new(block("10.0.0.0/29"));
        let now = Instant::now();
        let a = pool.next_free().unwrap();
        pool.release(a, now).unwrap();

        // Corrupt entries: one outside the block, one still free
        pool.cooling.insert(address_to_u128(ip("10.0.1.1")), now);
        pool.cooling.insert(address_to_u128(ip("10.0.0.6")), now);

        assert_eq!(pool.recycle(now, Duration::ZERO), 1);
        assert_eq!(pool.cooling_count(), 0);
        assert_eq!(pool.state_of(&a), Some(AddressState::Free));
    }

    #[test]
    fn test_large_ipv6_block_is_lazy() {
        let mut pool = BlockPool::new(block("2001:db8::/64"));
        assert_eq!(pool.free_count(), (1u128 << 64) - 1);
        assert_eq!(pool.next_free().unwrap(), ip("2001:db8::1"));
        assert_eq!(pool.next_free().unwrap(), ip("2001:db8::2"));
    }

    #[test]
    fn test_tracker_routes_by_block() {
        let mut tracker = FreeAddressTracker::new(Duration::from_secs(15));
        let b = block("10.0.0.0/30");
        tracker.add_block(b);

        let a = tracker.next_free(&b).unwrap();
        assert_eq!(
            tracker.next_free(&block("10.1.0.0/30")).unwrap_err(),
            MobilityError::BlockNotFound(block("10.1.0.0/30"))
        );

        let now = Instant::now();
        tracker.release(&b, a, now).unwrap();
        assert_eq!(tracker.recycle(now + Duration::from_secs(15)), 1);
        assert_eq!(tracker.usage()[0].free, 2);

        assert!(tracker.discard_block(&b).is_some());
        assert!(tracker.pool(&b).is_none());
    }
}
