use log::{debug, info};
use crate::{
    consensus::{is_power_sufficient, signing_power},
    types::{BridgeBatch, Valset},
    Error,
};
use super::{collect_error, finish, Relayer};

/// 选举用的批次指纹：链引用 ID 与 nonce
pub fn batch_fingerprint(batch: &BridgeBatch) -> Vec<u8> {
    let mut data = batch.chain_reference_id.as_bytes().to_vec();
    data.extend_from_slice(&batch.nonce.to_be_bytes());
    data
}

fn has_quorum(valset: &Valset, batch: &BridgeBatch) -> bool {
    is_power_sufficient(signing_power(valset, &batch.bytes_to_sign, &batch.signatures))
}

impl Relayer {
    pub async fn sign_bridge_batches(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        let mut confirmations = Vec::new();

        for processor in self.processors().await {
            let chain_reference_id = processor.chain_reference_id();
            let batches = match self.home.query_bridge_batches_for_signing(&chain_reference_id).await {
                Ok(batches) => batches,
                Err(e) => {
                    collect_error(&mut errors, e, &format!("Failed to query bridge batches for {}", chain_reference_id))?;
                    continue;
                }
            };
            if batches.is_empty() {
                continue;
            }

            match processor.sign_bridge_batches(batches).await {
                Ok(signed) => confirmations.extend(signed),
                Err(e) => collect_error(&mut errors, e, &format!("Failed to sign bridge batches for {}", chain_reference_id))?,
            }
        }

        if !confirmations.is_empty() {
            let count = confirmations.len();
            let _guard = self.chain_lock.lock().await;
            self.home.broadcast_bridge_batch_confirmations(confirmations).await?;
            info!("Broadcast {} bridge batch confirmations", count);
        }

        finish(errors)
    }

    /// 达到门限且本验证者当选的批次才会被中继
    pub async fn relay_bridge_batches(&self) -> Result<(), Error> {
        let election = self.leader_election().await?;
        let mut errors = Vec::new();

        for processor in self.processors().await {
            let chain_reference_id = processor.chain_reference_id();
            let valset = match self.latest_valset(&chain_reference_id).await {
                Ok(Some(valset)) => valset,
                Ok(None) => {
                    debug!("Skipping bridge batches for {} until a valset is published", chain_reference_id);
                    continue;
                }
                Err(e) => {
                    collect_error(&mut errors, e, &format!("Failed to query valset for {}", chain_reference_id))?;
                    continue;
                }
            };

            let batches = match self.home.query_bridge_batches_for_relaying(&chain_reference_id).await {
                Ok(batches) => batches,
                Err(e) => {
                    collect_error(&mut errors, e, &format!("Failed to query bridge batches for {}", chain_reference_id))?;
                    continue;
                }
            };

            let mut elected = Vec::new();
            for batch in batches {
                if !has_quorum(&valset, &batch) {
                    debug!("Bridge batch {} on {} has not reached consensus", batch.nonce, chain_reference_id);
                    continue;
                }
                if election.allowed_to_execute(&batch_fingerprint(&batch))? {
                    elected.push(batch);
                }
            }
            if elected.is_empty() {
                continue;
            }

            info!("Relaying {} bridge batches on {}", elected.len(), chain_reference_id);
            let _guard = self.chain_lock.lock().await;
            match processor.relay_bridge_batches(elected).await {
                Ok(()) => {}
                Err(e) if e.is_no_consensus() => debug!("Skipping bridge relay on {}: {}", chain_reference_id, e),
                Err(e) => collect_error(&mut errors, e, &format!("Failed to relay bridge batches on {}", chain_reference_id))?,
            }
        }

        finish(errors)
    }

    pub async fn estimate_bridge_batches(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        let mut estimates = Vec::new();

        for processor in self.processors().await {
            let chain_reference_id = processor.chain_reference_id();
            let batches = match self.home.query_bridge_batches_for_estimating(&chain_reference_id).await {
                Ok(batches) => batches,
                Err(e) => {
                    collect_error(&mut errors, e, &format!("Failed to query bridge batches for {}", chain_reference_id))?;
                    continue;
                }
            };
            if batches.is_empty() {
                continue;
            }

            match processor.estimate_bridge_batches(batches).await {
                Ok(results) => estimates.extend(results.into_iter().filter(|e| e.estimate > 0)),
                Err(e) => collect_error(&mut errors, e, &format!("Failed to estimate bridge batches for {}", chain_reference_id))?,
            }
        }

        if !estimates.is_empty() {
            let count = estimates.len();
            let _guard = self.chain_lock.lock().await;
            self.home.add_bridge_batch_estimates(estimates).await?;
            info!("Reported {} bridge batch estimates", count);
        }

        finish(errors)
    }

    /// 在当前选举通道内让各处理器扫描并提交外部链事件声明
    pub async fn handle_bridge_events(&self) -> Result<(), Error> {
        let election = self.leader_election().await?;
        let mut errors = Vec::new();

        for processor in self.processors().await {
            let _guard = self.chain_lock.lock().await;
            if let Err(e) = processor.submit_event_claims(&election).await {
                let context = format!("Failed to submit event claims for {}", processor.chain_reference_id());
                collect_error(&mut errors, e, &context)?;
            }
        }

        finish(errors)
    }
}
