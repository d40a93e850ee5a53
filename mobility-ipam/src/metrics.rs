//! Metrics collection for the allocator

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use mobility_common::{AddressBlock, AddressFamily, BlockUsage, ErrorKind};
use std::time::Duration;
use tracing::debug;

/// Metrics collector for allocator operations
#[derive(Debug, Clone)]
pub struct IpamMetrics {
    prefix: String,
}

impl Default for IpamMetrics {
    fn default() -> Self {
        Self::new("mobilityd")
    }
}

fn family_label(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "ipv4",
        AddressFamily::Ipv6 => "ipv6",
    }
}

impl IpamMetrics {
    /// Create a new metrics collector with the given prefix
    ///
    /// Metric descriptions go to whichever recorder is installed at this point.
    pub fn new(prefix: &str) -> Self {
        let metrics = Self {
            prefix: prefix.to_string(),
        };
        metrics.describe();
        metrics
    }

    fn describe(&self) {
        describe_histogram!(
            format!("{}_allocation_duration_seconds", self.prefix),
            Unit::Seconds,
            "Time spent serving an allocation under the allocator lock"
        );
        describe_histogram!(
            format!("{}_recycle_sweep_duration_seconds", self.prefix),
            Unit::Seconds,
            "Time spent in one recycling sweep"
        );
        describe_counter!(
            format!("{}_addresses_recycled_total", self.prefix),
            Unit::Count,
            "Addresses returned to the free pools after cooling down"
        );
        describe_gauge!(
            format!("{}_block_addresses", self.prefix),
            Unit::Count,
            "Addresses per block and state"
        );
    }

    /// Metric name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record a registered block
    pub fn block_added(&self, block: &AddressBlock) {
        counter!(format!("{}_ip_blocks_added_total", self.prefix)).increment(1);
        counter!(
            format!("{}_ip_blocks_added_total", self.prefix),
            "family" => family_label(block.family())
        ).increment(1);
    }

    /// Record a removed block and the leases it took down with it
    pub fn block_removed(&self, block: &AddressBlock, terminated_leases: usize) {
        counter!(format!("{}_ip_blocks_removed_total", self.prefix)).increment(1);
        counter!(format!("{}_leases_terminated_total", self.prefix))
            .increment(terminated_leases as u64);

        for state in ["free", "allocated", "cooling_down"] {
            gauge!(
                format!("{}_block_addresses", self.prefix),
                "block" => block.to_string(),
                "state" => state
            ).set(0.0);
        }
    }

    /// Record the outcome of an allocation
    pub fn allocation_completed(&self, family: AddressFamily, duration: Duration, outcome: Option<ErrorKind>) {
        let outcome = outcome.map_or("success", |kind| kind.as_str());

        counter!(format!("{}_allocations_total", self.prefix)).increment(1);
        counter!(
            format!("{}_allocations_total", self.prefix),
            "family" => family_label(family),
            "outcome" => outcome
        ).increment(1);

        histogram!(format!("{}_allocation_duration_seconds", self.prefix)).record(duration.as_secs_f64());
    }

    /// Record the outcome of a release
    pub fn release_completed(&self, family: AddressFamily, outcome: Option<ErrorKind>) {
        let outcome = outcome.map_or("success", |kind| kind.as_str());

        counter!(format!("{}_releases_total", self.prefix)).increment(1);
        counter!(
            format!("{}_releases_total", self.prefix),
            "family" => family_label(family),
            "outcome" => outcome
        ).increment(1);
    }

    /// Record a recycling sweep
    pub fn sweep_completed(&self, recycled: usize, duration: Duration) {
        counter!(format!("{}_recycle_sweeps_total", self.prefix)).increment(1);
        counter!(format!("{}_addresses_recycled_total", self.prefix)).increment(recycled as u64);

        histogram!(format!("{}_recycle_sweep_duration_seconds", self.prefix)).record(duration.as_secs_f64());

        debug!(recycled, "Recycle sweep finished in {:?}", duration);
    }

    /// Publish per-block address counts
    pub fn usage_updated(&self, usage: &[BlockUsage]) {
        for entry in usage {
            let block = entry.block.to_string();
            gauge!(
                format!("{}_block_addresses", self.prefix),
                "block" => block.clone(),
                "state" => "free"
            ).set(entry.free as f64);
            gauge!(
                format!("{}_block_addresses", self.prefix),
                "block" => block.clone(),
                "state" => "allocated"
            ).set(entry.allocated as f64);
            gauge!(
                format!("{}_block_addresses", self.prefix),
                "block" => block,
                "state" => "cooling_down"
            ).set(entry.cooling_down as f64);
        }

        gauge!(format!("{}_ip_blocks", self.prefix)).set(usage.len() as f64);
    }
}
