use async_trait::async_trait;
use crate::{
    types::{
        BridgeBatch, BridgeBatchEstimate, ChainInfo, ExternalAccount, MessageWithEstimate,
        MessageWithSignatures, QueuedMessage, SignedBridgeBatch, SignedQueuedMessage, Snapshot,
        Valset,
    },
    Error,
};

#[cfg(test)]
pub(crate) mod testing;

/// 主链客户端：查询排队消息、验证者快照，并广播本验证者的交易
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HomeChain: Send + Sync {
    /// 当前区块高度
    async fn block_height(&self) -> Result<i64, Error>;

    /// 本验证者登记的存活截止高度
    async fn query_alive_until_height(&self) -> Result<i64, Error>;

    /// 按 ID 查询验证者快照，0 表示最新
    async fn query_snapshot(&self, id: u64) -> Result<Snapshot, Error>;

    /// 本验证者当前是否在质押
    async fn query_is_staking(&self) -> Result<bool, Error>;

    async fn query_chain_infos(&self) -> Result<Vec<ChainInfo>, Error>;

    /// 外部链最新发布的签名者集合；不存在时返回 `Error::NotFound`
    async fn query_latest_valset(&self, chain_reference_id: &str) -> Result<Valset, Error>;

    async fn query_messages_for_signing(&self, queue_type_name: &str) -> Result<Vec<QueuedMessage>, Error>;

    async fn query_messages_for_relaying(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error>;

    async fn query_messages_for_attesting(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error>;

    async fn query_messages_for_estimating(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error>;

    async fn query_bridge_batches_for_signing(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error>;

    async fn query_bridge_batches_for_relaying(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error>;

    async fn query_bridge_batches_for_estimating(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error>;

    /// 一次交易广播本轮收集到的全部签名
    async fn broadcast_message_signatures(&self, signatures: Vec<SignedQueuedMessage>) -> Result<(), Error>;

    async fn broadcast_bridge_batch_confirmations(&self, confirmations: Vec<SignedBridgeBatch>) -> Result<(), Error>;

    async fn keep_alive(&self) -> Result<(), Error>;

    async fn add_external_chain_info(&self, accounts: Vec<ExternalAccount>) -> Result<(), Error>;

    async fn add_message_gas_estimates(&self, estimates: Vec<MessageWithEstimate>) -> Result<(), Error>;

    async fn add_bridge_batch_estimates(&self, estimates: Vec<BridgeBatchEstimate>) -> Result<(), Error>;
}
