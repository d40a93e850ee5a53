//! # mobilityd IP allocator
//!
//! Hands out IPv4 and IPv6 addresses to mobile subscribers from blocks an
//! administrator registers at runtime.
//!
//! ## Features
//!
//! - Non-overlapping block registry with deterministic allocation order
//! - Lazy free-address tracking, so large IPv6 blocks cost nothing up front
//! - Released addresses cool down before they are handed out again
//! - Background recycling task with clean shutdown
//! - Observability with tracing and metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use mobility_common::{AddressFamily, AllocatorConfig, Result};
//! use mobility_ipam::{IpAllocator, IpPoolAllocator};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let allocator = IpPoolAllocator::new(AllocatorConfig::default());
//!     allocator.start_recycler().await;
//!
//!     allocator.add_ip_block("10.0.0.0/24".parse()?).await?;
//!     let lease = allocator
//!         .alloc_ip_address("IMSI001010000000001", AddressFamily::Ipv4, None)
//!         .await?;
//!     println!("{} -> {}", lease.sid, lease.ip);
//!
//!     allocator.release_ip_address(&lease.sid, lease.ip).await?;
//!     allocator.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub use allocator::{IpAllocator, IpPoolAllocator};
pub use engine::IpamState;
pub use ledger::AllocationLedger;
pub use crate::metrics::IpamMetrics;
pub use pool::{AddressState, BlockPool, FreeAddressTracker};
pub use registry::BlockRegistry;

mod allocator;
mod engine;
mod ledger;
mod metrics;
mod pool;
mod recycler;
mod registry;
