use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, error};
use crate::{
    election::LeaderElection,
    types::{
        BridgeBatch, BridgeBatchEstimate, ChainInfo, ChainType, ExternalAccount,
        MessageWithEstimate, MessageWithSignatures, QueuedMessage, SignedBridgeBatch,
        SignedQueuedMessage,
    },
    Error,
};

#[cfg(test)]
pub(crate) mod testing;

/// 外部链处理器，每条外部链一个实例，由具体链族的实现提供
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Processor: Send + Sync {
    fn chain_reference_id(&self) -> String;

    fn supported_queues(&self) -> Vec<String>;

    /// 本验证者在该链上的账户
    fn external_account(&self) -> ExternalAccount;

    /// 连接的链与登记信息不一致时返回 `Error::WrongChain`
    async fn is_right_chain(&self) -> Result<(), Error>;

    /// 本地签名，不触达链
    async fn sign_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<QueuedMessage>,
    ) -> Result<Vec<SignedQueuedMessage>, Error>;

    /// 提交执行交易；签名不足时返回 `Error::NoConsensus`
    async fn process_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<(), Error>;

    async fn provide_evidence(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<(), Error>;

    async fn estimate_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<Vec<MessageWithEstimate>, Error>;

    async fn health_check(&self) -> Result<(), Error>;

    async fn sign_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<Vec<SignedBridgeBatch>, Error>;

    async fn relay_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<(), Error>;

    async fn estimate_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<Vec<BridgeBatchEstimate>, Error>;

    /// 扫描外部链事件并提交声明，仅在当选时执行
    async fn submit_event_claims(&self, election: &LeaderElection) -> Result<(), Error>;
}

/// 处理器工厂，每个链族一个实现
#[async_trait]
pub trait ProcessorFactory: Send + Sync {
    async fn create_processor(&self, chain: &ChainInfo) -> Result<Arc<dyn Processor>, Error>;
}

/// 按链类型分发到对应的处理器工厂
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: HashMap<ChainType, Arc<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain_type: ChainType, factory: Arc<dyn ProcessorFactory>) -> &mut Self {
        self.factories.insert(chain_type, factory);
        self
    }

    /// 创建处理器并确认其连接的是正确的链
    pub async fn build(&self, chain: &ChainInfo) -> Result<Arc<dyn Processor>, Error> {
        let factory = self.factories.get(&chain.chain_type).ok_or_else(|| {
            Error::Config(format!("Unsupported chain type: {}", chain.chain_type))
        })?;

        let processor = factory.create_processor(chain).await?;
        if let Err(e) = processor.is_right_chain().await {
            error!("Processor for {} failed chain check: {}", chain.chain_reference_id, e);
            return Err(e);
        }

        debug!("Built processor for chain {}", chain.chain_reference_id);
        Ok(processor)
    }
}
