//! Registry of administrator-added IP blocks

use mobility_common::{AddressBlock, AddressFamily, MobilityError, Result};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::debug;

/// Set of registered blocks
///
/// No two registered blocks share an address. Iteration follows network
/// address order, so it is deterministic for any registration history.
#[derive(Debug, Default, Clone)]
pub struct BlockRegistry {
    blocks: BTreeSet<AddressBlock>,
}

impl BlockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block
    ///
    /// Re-adding an identical block counts as an overlap.
    pub fn add(&mut self, block: AddressBlock) -> Result<()> {
        if let Some(existing) = self.blocks.iter().find(|b| b.overlaps(&block)) {
            return Err(MobilityError::OverlappingBlock {
                block,
                existing: *existing,
            });
        }

        self.blocks.insert(block);
        debug!(block = %block, "Registered IP block");
        Ok(())
    }

    /// Unregister a block
    pub fn remove(&mut self, block: &AddressBlock) -> Result<()> {
        if !self.blocks.remove(block) {
            return Err(MobilityError::BlockNotFound(*block));
        }
        debug!(block = %block, "Unregistered IP block");
        Ok(())
    }

    /// Fail with `BlockNotFound` unless the block is registered
    pub fn ensure_registered(&self, block: &AddressBlock) -> Result<()> {
        if self.contains(block) {
            Ok(())
        } else {
            Err(MobilityError::BlockNotFound(*block))
        }
    }

    /// Check if the exact block is registered
    pub fn contains(&self, block: &AddressBlock) -> bool {
        self.blocks.contains(block)
    }

    /// Registered block holding the address, if any
    pub fn find_containing(&self, ip: &IpAddr) -> Option<AddressBlock> {
        self.blocks.iter().find(|b| b.contains(ip)).copied()
    }

    /// Registered blocks of one family, in registry order
    pub fn blocks_of(&self, family: AddressFamily) -> impl Iterator<Item = &AddressBlock> + '_ {
        self.blocks.iter().filter(move |b| b.family() == family)
    }

    /// All registered blocks, in registry order
    pub fn iter(&self) -> impl Iterator<Item = &AddressBlock> + '_ {
        self.blocks.iter()
    }

    /// Number of registered blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
