use log::{debug, info};
use crate::{
    consensus::{is_quorum_reached, validate_valset},
    types::{MessageWithSignatures, Valset},
    Error,
};
use super::{collect_error, finish, Relayer};

/// 挑出本验证者负责中继的消息：尚无执行结果，且 ID 对验证者数量取模等于本验证者下标
pub fn select_relay_candidates(
    messages: Vec<MessageWithSignatures>,
    offset: usize,
    validator_count: usize,
) -> Vec<MessageWithSignatures> {
    if validator_count == 0 {
        return Vec::new();
    }

    messages
        .into_iter()
        .filter(|m| !m.has_evidence())
        .filter(|m| m.id() % validator_count as u64 == offset as u64)
        .collect()
}

/// 只对携带共识的消息、且已知签名者集合时做门限预检
fn passes_quorum_precheck(valset: Option<&Valset>, message: &MessageWithSignatures) -> bool {
    match valset {
        Some(valset) if message.message.payload.requires_consensus() => is_quorum_reached(valset, message),
        _ => true,
    }
}

impl Relayer {
    /// 签名所有待签消息，汇总后一次广播
    pub async fn sign_messages(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        let mut signed = Vec::new();

        for processor in self.processors().await {
            for queue in processor.supported_queues() {
                let messages = match self.home.query_messages_for_signing(&queue).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        collect_error(&mut errors, e, &format!("Failed to query messages for signing in {}", queue))?;
                        continue;
                    }
                };
                if messages.is_empty() {
                    continue;
                }

                debug!("Signing {} messages in {}", messages.len(), queue);
                match processor.sign_messages(&queue, messages).await {
                    Ok(signatures) => signed.extend(signatures),
                    Err(e) => collect_error(&mut errors, e, &format!("Failed to sign messages in {}", queue))?,
                }
            }
        }

        if !signed.is_empty() {
            let count = signed.len();
            let _guard = self.chain_lock.lock().await;
            self.home.broadcast_message_signatures(signed).await?;
            info!("Broadcast {} message signatures", count);
        }

        finish(errors)
    }

    /// 已有执行结果的消息交给处理器提交证据
    pub async fn attest_messages(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        for processor in self.processors().await {
            for queue in processor.supported_queues() {
                let messages: Vec<MessageWithSignatures> = match self.home.query_messages_for_attesting(&queue).await {
                    Ok(messages) => messages.into_iter().filter(|m| m.has_evidence()).collect(),
                    Err(e) => {
                        collect_error(&mut errors, e, &format!("Failed to query messages for attesting in {}", queue))?;
                        continue;
                    }
                };
                if messages.is_empty() {
                    continue;
                }

                debug!("Providing evidence for {} messages in {}", messages.len(), queue);
                let _guard = self.chain_lock.lock().await;
                if let Err(e) = processor.provide_evidence(&queue, messages).await {
                    collect_error(&mut errors, e, &format!("Failed to provide evidence in {}", queue))?;
                }
            }
        }

        finish(errors)
    }

    /// 查询外部链最新签名者集合；尚未发布时返回 None
    pub(crate) async fn latest_valset(&self, chain_reference_id: &str) -> Result<Option<Valset>, Error> {
        match self.home.query_latest_valset(chain_reference_id).await {
            Ok(valset) => {
                validate_valset(&valset)?;
                Ok(Some(valset))
            }
            Err(e) if e.is_not_found() => {
                debug!("No valset published for {}", chain_reference_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 按静态分片挑出本验证者负责的消息交给处理器执行；已知签名者集合时跳过签名不足的共识消息
    pub async fn relay_messages(&self) -> Result<(), Error> {
        let snapshot = self.home.query_snapshot(0).await?;
        let Some(offset) = snapshot.offset_of(&self.config.validator.address) else {
            debug!("Validator {} is not in the current snapshot, skipping relay", self.config.validator.address);
            return Ok(());
        };
        let validator_count = snapshot.validators.len();

        let mut errors = Vec::new();
        for processor in self.processors().await {
            let chain_reference_id = processor.chain_reference_id();
            // 尚未发布签名者集合时不做预检，由处理器返回共识不足
            let valset = match self.latest_valset(&chain_reference_id).await {
                Ok(valset) => valset,
                Err(e) => {
                    collect_error(&mut errors, e, &format!("Failed to query valset for {}", chain_reference_id))?;
                    continue;
                }
            };

            for queue in processor.supported_queues() {
                let messages = match self.home.query_messages_for_relaying(&queue).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        collect_error(&mut errors, e, &format!("Failed to query messages for relaying in {}", queue))?;
                        continue;
                    }
                };

                let (ready, pending): (Vec<_>, Vec<_>) = select_relay_candidates(messages, offset, validator_count)
                    .into_iter()
                    .partition(|m| passes_quorum_precheck(valset.as_ref(), m));
                if !pending.is_empty() {
                    debug!("{} messages in {} have not reached consensus", pending.len(), queue);
                }
                if ready.is_empty() {
                    continue;
                }

                info!("Relaying {} messages in {}", ready.len(), queue);
                let _guard = self.chain_lock.lock().await;
                match processor.process_messages(&queue, ready).await {
                    Ok(()) => {}
                    Err(e) if e.is_no_consensus() => debug!("Skipping relay in {}: {}", queue, e),
                    Err(e) => collect_error(&mut errors, e, &format!("Failed to relay messages in {}", queue))?,
                }
            }
        }

        finish(errors)
    }

    /// 估算执行成本，丢弃零估算后批量上报
    pub async fn estimate_messages(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        let mut estimates = Vec::new();

        for processor in self.processors().await {
            for queue in processor.supported_queues() {
                let messages = match self.home.query_messages_for_estimating(&queue).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        collect_error(&mut errors, e, &format!("Failed to query messages for estimating in {}", queue))?;
                        continue;
                    }
                };
                if messages.is_empty() {
                    continue;
                }

                match processor.estimate_messages(&queue, messages).await {
                    Ok(results) => {
                        let total = results.len();
                        estimates.extend(results.into_iter().filter(|e| e.estimate > 0));
                        debug!("Estimated {} messages in {}", total, queue);
                    }
                    Err(e) => collect_error(&mut errors, e, &format!("Failed to estimate messages in {}", queue))?,
                }
            }
        }

        if !estimates.is_empty() {
            let count = estimates.len();
            let _guard = self.chain_lock.lock().await;
            self.home.add_message_gas_estimates(estimates).await?;
            info!("Reported {} message estimates", count);
        }

        finish(errors)
    }
}
