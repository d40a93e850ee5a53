//! Mobility service translating wire messages to allocator calls

use mobility_common::{
    protocol::{
        AllocateIpRequest, GwInfo, IpAddressMsg, IpBlockMsg, ListAddedIpBlocksResponse,
        ListAllocatedIpsResponse, ReleaseIpRequest, RemoveIpBlockRequest, RemoveIpBlockResponse,
        SubscriberIpTable,
    },
    AddressBlock, AddressFamily, BlockUsage, GatewayInfo, Result,
};
use mobility_ipam::IpAllocator;
use std::{net::IpAddr, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Service backing every RPC of the mobility daemon
pub struct MobilityService {
    allocator: Arc<dyn IpAllocator>,
    gateway: RwLock<Option<GatewayInfo>>,
}

impl MobilityService {
    /// Create a service over an allocator
    pub fn new(allocator: Arc<dyn IpAllocator>) -> Self {
        Self {
            allocator,
            gateway: RwLock::new(None),
        }
    }

    /// Register a block
    #[instrument(skip(self, msg))]
    pub async fn add_ip_block(&self, msg: &IpBlockMsg) -> Result<()> {
        let block = AddressBlock::try_from(msg)?;
        self.allocator.add_ip_block(block).await
    }

    /// Remove blocks, reporting the ones actually removed
    #[instrument(skip(self, request), fields(count = request.ip_blocks.len(), force = request.force))]
    pub async fn remove_ip_blocks(&self, request: &RemoveIpBlockRequest) -> Result<RemoveIpBlockResponse> {
        let blocks = request
            .ip_blocks
            .iter()
            .map(AddressBlock::try_from)
            .collect::<Result<Vec<_>>>()?;

        let removed = self.allocator.remove_ip_blocks(&blocks, request.force).await?;
        Ok(RemoveIpBlockResponse {
            ip_blocks: removed.into_iter().map(IpBlockMsg::from).collect(),
        })
    }

    /// Registered IPv4 blocks
    pub async fn list_added_ipv4_blocks(&self) -> ListAddedIpBlocksResponse {
        let ip_block_list = self
            .allocator
            .list_added_ip_blocks()
            .await
            .into_iter()
            .filter(|block| block.family() == AddressFamily::Ipv4)
            .map(IpBlockMsg::from)
            .collect();

        ListAddedIpBlocksResponse { ip_block_list }
    }

    /// Addresses leased from a block
    #[instrument(skip(self, msg))]
    pub async fn list_allocated_ips(&self, msg: &IpBlockMsg) -> Result<ListAllocatedIpsResponse> {
        let block = AddressBlock::try_from(msg)?;
        let ips = self.allocator.list_allocated_ips(&block).await?;
        Ok(ListAllocatedIpsResponse {
            ip_list: ips.into_iter().map(IpAddressMsg::from).collect(),
        })
    }

    /// Lease an address to a subscriber
    #[instrument(skip(self, request), fields(sid = %request.sid))]
    pub async fn allocate_ip_address(&self, request: &AllocateIpRequest) -> Result<IpAddressMsg> {
        let apn = Some(request.apn.clone()).filter(|apn| !apn.is_empty());
        let lease = self
            .allocator
            .alloc_ip_address(&request.sid, request.version.into(), apn)
            .await?;

        debug!(sid = %lease.sid, ip = %lease.ip, "Allocation served");
        Ok(lease.ip.into())
    }

    /// End a subscriber's lease
    #[instrument(skip(self, request), fields(sid = %request.sid))]
    pub async fn release_ip_address(&self, request: &ReleaseIpRequest) -> Result<()> {
        let ip = IpAddr::try_from(&request.ip)?;
        self.allocator.release_ip_address(&request.sid, ip).await?;

        debug!(sid = %request.sid, ip = %ip, "Release served");
        Ok(())
    }

    /// Every active lease
    pub async fn subscriber_ip_table(&self) -> SubscriberIpTable {
        let entries = self
            .allocator
            .subscriber_ip_table()
            .await
            .into_iter()
            .map(Into::into)
            .collect();

        SubscriberIpTable { entries }
    }

    /// Usage counters per registered block
    pub async fn block_usage(&self) -> Vec<BlockUsage> {
        self.allocator.block_usage().await
    }

    /// Gateway information, if set
    pub async fn gateway_info(&self) -> Option<GwInfo> {
        self.gateway.read().await.clone().map(GwInfo::from)
    }

    /// Validate and store gateway information
    #[instrument(skip(self, msg))]
    pub async fn set_gateway_info(&self, msg: &GwInfo) -> Result<()> {
        let info = GatewayInfo::try_from(msg)?;
        debug!(ip = %info.ip, mac = %info.mac, "Updating gateway info");
        *self.gateway.write().await = Some(info);
        Ok(())
    }

    /// Stop background allocator work
    pub async fn shutdown(&self) {
        self.allocator.shutdown().await;
    }
}
