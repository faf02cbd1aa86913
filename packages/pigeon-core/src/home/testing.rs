use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use crate::{
    types::{
        BridgeBatch, BridgeBatchEstimate, ChainInfo, ExternalAccount, MessageWithEstimate,
        MessageWithSignatures, QueuedMessage, SignedBridgeBatch, SignedQueuedMessage, Snapshot,
        SnapshotValidator, Valset,
    },
    Error,
};
use super::HomeChain;

pub fn snapshot(validators: &[&str]) -> Snapshot {
    Snapshot {
        id: 1,
        height: 10,
        validators: validators
            .iter()
            .map(|address| SnapshotValidator {
                address: address.to_string(),
                share_count: 100,
                external_accounts: vec![],
            })
            .collect(),
    }
}

/// 内存中的主链替身，记录所有写操作
pub struct FakeHomeChain {
    pub height: AtomicI64,
    pub alive_until: AtomicI64,
    pub staking: AtomicBool,
    pub reachable: AtomicBool,
    pub snapshot: Mutex<Snapshot>,
    pub chain_infos: Mutex<Vec<ChainInfo>>,
    pub valsets: Mutex<HashMap<String, Valset>>,
    pub signing: Mutex<HashMap<String, Vec<QueuedMessage>>>,
    pub relaying: Mutex<HashMap<String, Vec<MessageWithSignatures>>>,
    pub attesting: Mutex<HashMap<String, Vec<MessageWithSignatures>>>,
    pub estimating: Mutex<HashMap<String, Vec<MessageWithSignatures>>>,
    pub batches: Mutex<HashMap<String, Vec<BridgeBatch>>>,
    pub failing_queues: Mutex<HashSet<String>>,

    pub height_queries: AtomicU32,
    pub alive_queries: AtomicU32,
    pub chain_info_queries: AtomicU32,
    pub keep_alives: AtomicU32,
    pub broadcasts: Mutex<Vec<Vec<SignedQueuedMessage>>>,
    pub batch_confirmations: Mutex<Vec<Vec<SignedBridgeBatch>>>,
    pub external_infos: Mutex<Vec<Vec<ExternalAccount>>>,
    pub message_estimates: Mutex<Vec<Vec<MessageWithEstimate>>>,
    pub batch_estimates: Mutex<Vec<Vec<BridgeBatchEstimate>>>,
}

impl FakeHomeChain {
    pub fn new(validators: &[&str]) -> Self {
        Self {
            height: AtomicI64::new(52),
            alive_until: AtomicI64::new(1_000),
            staking: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            snapshot: Mutex::new(snapshot(validators)),
            chain_infos: Mutex::new(vec![]),
            valsets: Mutex::new(HashMap::new()),
            signing: Mutex::new(HashMap::new()),
            relaying: Mutex::new(HashMap::new()),
            attesting: Mutex::new(HashMap::new()),
            estimating: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
            failing_queues: Mutex::new(HashSet::new()),
            height_queries: AtomicU32::new(0),
            alive_queries: AtomicU32::new(0),
            chain_info_queries: AtomicU32::new(0),
            keep_alives: AtomicU32::new(0),
            broadcasts: Mutex::new(vec![]),
            batch_confirmations: Mutex::new(vec![]),
            external_infos: Mutex::new(vec![]),
            message_estimates: Mutex::new(vec![]),
            batch_estimates: Mutex::new(vec![]),
        }
    }

    fn check_reachable(&self) -> Result<(), Error> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("home chain unreachable".to_string()))
        }
    }

    fn queue<T: Clone>(&self, store: &Mutex<HashMap<String, Vec<T>>>, queue: &str) -> Result<Vec<T>, Error> {
        self.check_reachable()?;
        if self.failing_queues.lock().unwrap().contains(queue) {
            return Err(Error::Network(format!("query failed for {}", queue)));
        }
        Ok(store.lock().unwrap().get(queue).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl HomeChain for FakeHomeChain {
    async fn block_height(&self) -> Result<i64, Error> {
        self.check_reachable()?;
        self.height_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn query_alive_until_height(&self) -> Result<i64, Error> {
        self.check_reachable()?;
        self.alive_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.alive_until.load(Ordering::SeqCst))
    }

    async fn query_snapshot(&self, _id: u64) -> Result<Snapshot, Error> {
        self.check_reachable()?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn query_is_staking(&self) -> Result<bool, Error> {
        self.check_reachable()?;
        Ok(self.staking.load(Ordering::SeqCst))
    }

    async fn query_chain_infos(&self) -> Result<Vec<ChainInfo>, Error> {
        self.check_reachable()?;
        self.chain_info_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain_infos.lock().unwrap().clone())
    }

    async fn query_latest_valset(&self, chain_reference_id: &str) -> Result<Valset, Error> {
        self.check_reachable()?;
        self.valsets
            .lock()
            .unwrap()
            .get(chain_reference_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("valset for {}", chain_reference_id)))
    }

    async fn query_messages_for_signing(&self, queue_type_name: &str) -> Result<Vec<QueuedMessage>, Error> {
        self.queue(&self.signing, queue_type_name)
    }

    async fn query_messages_for_relaying(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error> {
        self.queue(&self.relaying, queue_type_name)
    }

    async fn query_messages_for_attesting(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error> {
        self.queue(&self.attesting, queue_type_name)
    }

    async fn query_messages_for_estimating(&self, queue_type_name: &str) -> Result<Vec<MessageWithSignatures>, Error> {
        self.queue(&self.estimating, queue_type_name)
    }

    async fn query_bridge_batches_for_signing(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error> {
        self.queue(&self.batches, chain_reference_id)
    }

    async fn query_bridge_batches_for_relaying(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error> {
        self.queue(&self.batches, chain_reference_id)
    }

    async fn query_bridge_batches_for_estimating(&self, chain_reference_id: &str) -> Result<Vec<BridgeBatch>, Error> {
        self.queue(&self.batches, chain_reference_id)
    }

    async fn broadcast_message_signatures(&self, signatures: Vec<SignedQueuedMessage>) -> Result<(), Error> {
        self.check_reachable()?;
        self.broadcasts.lock().unwrap().push(signatures);
        Ok(())
    }

    async fn broadcast_bridge_batch_confirmations(&self, confirmations: Vec<SignedBridgeBatch>) -> Result<(), Error> {
        self.check_reachable()?;
        self.batch_confirmations.lock().unwrap().push(confirmations);
        Ok(())
    }

    async fn keep_alive(&self) -> Result<(), Error> {
        self.check_reachable()?;
        self.keep_alives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_external_chain_info(&self, accounts: Vec<ExternalAccount>) -> Result<(), Error> {
        self.check_reachable()?;
        self.external_infos.lock().unwrap().push(accounts);
        Ok(())
    }

    async fn add_message_gas_estimates(&self, estimates: Vec<MessageWithEstimate>) -> Result<(), Error> {
        self.check_reachable()?;
        self.message_estimates.lock().unwrap().push(estimates);
        Ok(())
    }

    async fn add_bridge_batch_estimates(&self, estimates: Vec<BridgeBatchEstimate>) -> Result<(), Error> {
        self.check_reachable()?;
        self.batch_estimates.lock().unwrap().push(estimates);
        Ok(())
    }
}
