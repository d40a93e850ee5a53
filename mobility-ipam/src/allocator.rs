//! Allocator interface and the in-memory pool implementation

use crate::engine::IpamState;
use crate::metrics::IpamMetrics;
use crate::pool::AddressState;
use crate::recycler::{self, Recycler};
use async_trait::async_trait;
use mobility_common::{
    AddressBlock, AddressFamily, AllocatorConfig, BlockUsage, IpLease, Result, SubscriberIpEntry,
};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Operations every address allocator offers
///
/// Implementations serialise all mutations internally, so the trait object
/// can be shared between request handlers.
#[async_trait]
pub trait IpAllocator: Send + Sync {
    /// Register a CIDR block
    async fn add_ip_block(&self, block: AddressBlock) -> Result<()>;

    /// Remove blocks, terminating their leases when `force` is set
    async fn remove_ip_blocks(&self, blocks: &[AddressBlock], force: bool) -> Result<Vec<AddressBlock>>;

    /// Registered blocks in network address order
    async fn list_added_ip_blocks(&self) -> Vec<AddressBlock>;

    /// Addresses currently leased from a block
    async fn list_allocated_ips(&self, block: &AddressBlock) -> Result<Vec<IpAddr>>;

    /// Lease an address of `family` to a subscriber
    async fn alloc_ip_address(&self, sid: &str, family: AddressFamily, apn: Option<String>) -> Result<IpLease>;

    /// End the subscriber's lease on `ip`
    async fn release_ip_address(&self, sid: &str, ip: IpAddr) -> Result<()>;

    /// Lease held by a subscriber for a family
    async fn lookup_by_subscriber(&self, sid: &str, family: AddressFamily) -> Option<IpLease>;

    /// Every active lease as a table row
    async fn subscriber_ip_table(&self) -> Vec<SubscriberIpEntry>;

    /// Usage counters per registered block
    async fn block_usage(&self) -> Vec<BlockUsage>;

    /// Stop background work; the allocator stays usable
    async fn shutdown(&self) {}
}

/// In-memory allocator drawing from administrator-added blocks
///
/// One lock guards the registry, tracker and ledger; block changes,
/// allocations, releases and recycling sweeps never interleave.
pub struct IpPoolAllocator {
    state: Arc<Mutex<IpamState>>,
    config: AllocatorConfig,
    metrics: IpamMetrics,
    recycler: Mutex<Option<Recycler>>,
}

impl IpPoolAllocator {
    /// Create an allocator with an empty registry and no background task
    pub fn new(config: AllocatorConfig) -> Self {
        Self::with_metrics(config, IpamMetrics::default())
    }

    /// Create an allocator reporting through the given metrics collector
    pub fn with_metrics(config: AllocatorConfig, metrics: IpamMetrics) -> Self {
        let state = IpamState::new(config.recycle_interval());
        Self {
            state: Arc::new(Mutex::new(state)),
            config,
            metrics,
            recycler: Mutex::new(None),
        }
    }

    /// Allocator configuration
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Start the periodic recycling sweep if it is not already running
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start_recycler(&self) {
        let mut recycler = self.recycler.lock().await;
        if recycler.is_none() {
            *recycler = Some(Recycler::spawn(
                Arc::clone(&self.state),
                self.config.sweep_interval(),
                self.metrics.clone(),
            ));
        }
    }

    /// Whether the background sweep is running
    pub async fn recycler_running(&self) -> bool {
        self.recycler.lock().await.is_some()
    }

    /// Run one recycling sweep now, returning how many addresses were freed
    pub async fn recycle_now(&self) -> usize {
        recycler::sweep(&self.state, &self.metrics).await
    }

    /// State of an address in whichever registered block holds it
    pub async fn address_state(&self, ip: &IpAddr) -> Option<AddressState> {
        self.state.lock().await.address_state(ip)
    }

    fn publish_usage(&self, state: &IpamState) {
        self.metrics.usage_updated(&state.block_usage());
    }
}

#[async_trait]
impl IpAllocator for IpPoolAllocator {
    #[instrument(skip_all, fields(block = %block))]
    async fn add_ip_block(&self, block: AddressBlock) -> Result<()> {
        let mut state = self.state.lock().await;
        state.add_ip_block(block)?;
        self.metrics.block_added(&block);
        self.publish_usage(&state);
        Ok(())
    }

    #[instrument(skip(self, blocks), fields(count = blocks.len()))]
    async fn remove_ip_blocks(&self, blocks: &[AddressBlock], force: bool) -> Result<Vec<AddressBlock>> {
        let mut state = self.state.lock().await;
        let usage = state.block_usage();
        let removed = state.remove_ip_blocks(blocks, force)?;

        for block in &removed {
            let terminated = usage
                .iter()
                .find(|u| u.block == *block)
                .map_or(0, |u| u.allocated);
            self.metrics.block_removed(block, terminated);
        }
        self.publish_usage(&state);
        Ok(removed)
    }

    async fn list_added_ip_blocks(&self) -> Vec<AddressBlock> {
        self.state.lock().await.list_added_ip_blocks()
    }

    #[instrument(skip_all, fields(block = %block))]
    async fn list_allocated_ips(&self, block: &AddressBlock) -> Result<Vec<IpAddr>> {
        self.state.lock().await.list_allocated_ips(block)
    }

    #[instrument(skip(self, sid, family), fields(sid = %sid, family = %family))]
    async fn alloc_ip_address(&self, sid: &str, family: AddressFamily, apn: Option<String>) -> Result<IpLease> {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let result = state.allocate(sid, family, apn);

        self.metrics.allocation_completed(
            family,
            started.elapsed(),
            result.as_ref().err().map(|e| e.kind()),
        );
        if result.is_ok() {
            self.publish_usage(&state);
        }
        result
    }

    #[instrument(skip_all, fields(sid = %sid, ip = %ip))]
    async fn release_ip_address(&self, sid: &str, ip: IpAddr) -> Result<()> {
        let mut state = self.state.lock().await;
        let result = state.release(sid, ip, Instant::now());

        self.metrics
            .release_completed(AddressFamily::of(&ip), result.as_ref().err().map(|e| e.kind()));
        let lease = result?;
        self.publish_usage(&state);
        debug!(
            block = %lease.block,
            cooling_secs = state.recycle_interval().as_secs(),
            "Address entered cooling-down"
        );
        Ok(())
    }

    async fn lookup_by_subscriber(&self, sid: &str, family: AddressFamily) -> Option<IpLease> {
        self.state.lock().await.lookup_by_subscriber(sid, family).cloned()
    }

    async fn subscriber_ip_table(&self) -> Vec<SubscriberIpEntry> {
        self.state.lock().await.subscriber_table()
    }

    async fn block_usage(&self) -> Vec<BlockUsage> {
        self.state.lock().await.block_usage()
    }

    async fn shutdown(&self) {
        let recycler = self.recycler.lock().await.take();
        if let Some(recycler) = recycler {
            recycler.stop().await;
        }
        info!("IP allocator shut down");
    }
}
