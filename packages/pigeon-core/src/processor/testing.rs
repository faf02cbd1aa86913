use async_trait::async_trait;
use std::sync::Mutex;
use crate::{
    election::LeaderElection,
    types::{
        BridgeBatch, BridgeBatchEstimate, ChainInfo, ChainType, ExternalAccount,
        MessagePayload, MessageWithEstimate, MessageWithSignatures, QueuedMessage,
        SignedBridgeBatch, SignedQueuedMessage,
    },
    Error,
};
use super::Processor;

pub fn chain_info(chain_reference_id: &str) -> ChainInfo {
    ChainInfo {
        chain_reference_id: chain_reference_id.to_string(),
        chain_type: ChainType::Evm,
        chain_id: 1,
        smart_contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
        min_on_chain_balance: "1000".to_string(),
        reference_block_height: 100,
        reference_block_hash: "0xabc".to_string(),
    }
}

pub fn queued_message(id: u64) -> QueuedMessage {
    QueuedMessage {
        id,
        nonce: id.to_be_bytes().to_vec(),
        bytes_to_sign: vec![id as u8; 32],
        payload: MessagePayload::SubmitLogicCall {
            hex_contract_address: "0x00000000000000000000000000000000000000bb".to_string(),
            abi: vec![],
            payload: vec![1, 2, 3],
            deadline: 0,
            sender_address: vec![],
        },
    }
}

pub fn message_with_signatures(id: u64) -> MessageWithSignatures {
    MessageWithSignatures {
        message: queued_message(id),
        signatures: vec![],
        public_access_data: vec![],
        error_data: vec![],
    }
}

/// 记录调用的处理器替身
pub struct FakeProcessor {
    pub chain_reference_id: String,
    pub queues: Vec<String>,
    pub right_chain: bool,
    pub estimate: u64,
    pub process_result: fn(u64) -> Result<(), Error>,
    pub signed: Mutex<Vec<(String, Vec<u64>)>>,
    pub processed: Mutex<Vec<(String, Vec<u64>)>>,
    pub evidence: Mutex<Vec<(String, Vec<u64>)>>,
    pub relayed_batches: Mutex<Vec<u64>>,
    pub event_claims: Mutex<u32>,
}

impl FakeProcessor {
    pub fn new(chain_reference_id: &str, queues: &[&str]) -> Self {
        Self {
            chain_reference_id: chain_reference_id.to_string(),
            queues: queues.iter().map(|q| q.to_string()).collect(),
            right_chain: true,
            estimate: 21_000,
            process_result: |_| Ok(()),
            signed: Mutex::new(vec![]),
            processed: Mutex::new(vec![]),
            evidence: Mutex::new(vec![]),
            relayed_batches: Mutex::new(vec![]),
            event_claims: Mutex::new(0),
        }
    }
}

fn ids(messages: &[MessageWithSignatures]) -> Vec<u64> {
    messages.iter().map(|m| m.id()).collect()
}

#[async_trait]
impl Processor for FakeProcessor {
    fn chain_reference_id(&self) -> String {
        self.chain_reference_id.clone()
    }

    fn supported_queues(&self) -> Vec<String> {
        self.queues.clone()
    }

    fn external_account(&self) -> ExternalAccount {
        ExternalAccount {
            chain_type: ChainType::Evm,
            chain_reference_id: self.chain_reference_id.clone(),
            address: "0x00000000000000000000000000000000000000cc".to_string(),
            pub_key: vec![2; 33],
            traits: vec![],
        }
    }

    async fn is_right_chain(&self) -> Result<(), Error> {
        if self.right_chain {
            Ok(())
        } else {
            Err(Error::WrongChain {
                expected: self.chain_reference_id.clone(),
                actual: "unknown".to_string(),
            })
        }
    }

    async fn sign_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<QueuedMessage>,
    ) -> Result<Vec<SignedQueuedMessage>, Error> {
        self.signed
            .lock()
            .unwrap()
            .push((queue_type_name.to_string(), messages.iter().map(|m| m.id).collect()));
        Ok(messages
            .into_iter()
            .map(|message| SignedQueuedMessage {
                queue_type_name: queue_type_name.to_string(),
                message,
                signature: vec![1; 65],
                signed_by_address: "0x00000000000000000000000000000000000000cc".to_string(),
            })
            .collect())
    }

    async fn process_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<(), Error> {
        self.processed.lock().unwrap().push((queue_type_name.to_string(), ids(&messages)));
        for message in &messages {
            (self.process_result)(message.id())?;
        }
        Ok(())
    }

    async fn provide_evidence(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<(), Error> {
        self.evidence.lock().unwrap().push((queue_type_name.to_string(), ids(&messages)));
        Ok(())
    }

    async fn estimate_messages(
        &self,
        queue_type_name: &str,
        messages: Vec<MessageWithSignatures>,
    ) -> Result<Vec<MessageWithEstimate>, Error> {
        Ok(messages
            .iter()
            .map(|m| MessageWithEstimate {
                queue_type_name: queue_type_name.to_string(),
                message_id: m.id(),
                // 偶数 ID 给出零估算
                estimate: if m.id() % 2 == 0 { 0 } else { self.estimate },
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn sign_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<Vec<SignedBridgeBatch>, Error> {
        Ok(batches
            .into_iter()
            .map(|batch| SignedBridgeBatch {
                batch,
                signature: vec![1; 65],
                signed_by_address: "0x00000000000000000000000000000000000000cc".to_string(),
            })
            .collect())
    }

    async fn relay_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<(), Error> {
        self.relayed_batches
            .lock()
            .unwrap()
            .extend(batches.iter().map(|b| b.nonce));
        Ok(())
    }

    async fn estimate_bridge_batches(&self, batches: Vec<BridgeBatch>) -> Result<Vec<BridgeBatchEstimate>, Error> {
        Ok(batches
            .iter()
            .map(|b| BridgeBatchEstimate {
                chain_reference_id: b.chain_reference_id.clone(),
                nonce: b.nonce,
                estimate: self.estimate,
            })
            .collect())
    }

    async fn submit_event_claims(&self, election: &LeaderElection) -> Result<(), Error> {
        election.ensure_open()?;
        *self.event_claims.lock().unwrap() += 1;
        Ok(())
    }
}
