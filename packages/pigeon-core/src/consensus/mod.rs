//! 门限共识：校验各验证者签名、累计投票权，并构造外部链合约需要的有序签名载荷。

use std::collections::HashMap;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};
use crate::{
    types::{ConsensusPayload, MessageWithSignatures, SignatureComponents, ValidatorSignature, Valset},
    Error,
};

/// 投票权空间 2^32
pub const MAX_POWER: u64 = 1 << 32;

/// 2^32 的 2/3
pub const QUORUM_POWER_THRESHOLD: u64 = 2_863_311_530;

pub const SIGNATURE_LENGTH: usize = 65;

const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

pub type Address = [u8; 20];

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 实际被签名的摘要：keccak256(prefix || bytes_to_sign)
pub fn signed_digest(bytes_to_sign: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(SIGNED_MESSAGE_PREFIX.len() + bytes_to_sign.len());
    data.extend_from_slice(SIGNED_MESSAGE_PREFIX);
    data.extend_from_slice(bytes_to_sign);
    keccak256(&data)
}

pub fn parse_address(address: &str) -> Result<Address, Error> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    let bytes = hex::decode(stripped)
        .map_err(|e| Error::Serialization(format!("Invalid address {}: {}", address, e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::Serialization(format!("Invalid address length: {}", address)))
}

pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // 去掉 0x04 前缀后取哈希的后 20 字节
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// 拆分 65 字节签名，v 统一为 27/28
pub fn split_signature(signature: &[u8]) -> Result<SignatureComponents, Error> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid signature length: {}",
            signature.len()
        )));
    }

    let v = match signature[64] {
        0 | 27 => 27,
        1 | 28 => 28,
        other => return Err(Error::Crypto(format!("Invalid recovery id: {}", other))),
    };

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..64]);
    Ok(SignatureComponents { v, r, s })
}

/// 从签名恢复签名者地址
pub fn recover_signer(bytes_to_sign: &[u8], signature: &[u8]) -> Result<Address, Error> {
    let components = split_signature(signature)?;
    let recovery_id = RecoveryId::try_from(components.v - 27)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|e| Error::Crypto(e.to_string()))?;

    let digest = signed_digest(bytes_to_sign);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(address_from_key(&key))
}

/// 签名者集合中的地址必须都能解析
pub fn validate_valset(valset: &Valset) -> Result<(), Error> {
    for member in &valset.validators {
        parse_address(&member.address).map_err(|e| {
            Error::Fatal(format!("Malformed valset {}: {}", valset.valset_id, e))
        })?;
    }
    Ok(())
}

/// 按签名者地址索引签名，同一地址后出现的覆盖先出现的
fn index_signatures(signatures: &[ValidatorSignature]) -> HashMap<Address, &ValidatorSignature> {
    let mut indexed = HashMap::with_capacity(signatures.len());
    for sig in signatures {
        match parse_address(&sig.signer_address) {
            Ok(address) => {
                indexed.insert(address, sig);
            }
            Err(e) => debug!(error = %e, "skipping signature with unparsable signer"),
        }
    }
    indexed
}

/// 对齐 valset 顺序，返回每个验证者经过验证的签名分量
fn verified_components(
    valset: &Valset,
    bytes_to_sign: &[u8],
    signatures: &[ValidatorSignature],
) -> Vec<Option<SignatureComponents>> {
    let indexed = index_signatures(signatures);

    valset
        .validators
        .iter()
        .map(|member| {
            let address = match parse_address(&member.address) {
                Ok(address) => address,
                Err(e) => {
                    warn!(valset_id = valset.valset_id, error = %e, "unparsable valset member");
                    return None;
                }
            };
            let sig = indexed.get(&address)?;
            match recover_signer(bytes_to_sign, &sig.signature) {
                Ok(recovered) if recovered == address => split_signature(&sig.signature).ok(),
                Ok(recovered) => {
                    debug!(
                        claimed = %member.address,
                        recovered = %format_address(&recovered),
                        "signature does not recover to claimed validator"
                    );
                    None
                }
                Err(e) => {
                    debug!(claimed = %member.address, error = %e, "unrecoverable signature");
                    None
                }
            }
        })
        .collect()
}

/// 有效签名的投票权之和
pub fn signing_power(valset: &Valset, bytes_to_sign: &[u8], signatures: &[ValidatorSignature]) -> u64 {
    verified_components(valset, bytes_to_sign, signatures)
        .iter()
        .zip(&valset.validators)
        .filter(|(components, _)| components.is_some())
        .fold(0u64, |total, (_, member)| total.saturating_add(member.power))
}

pub fn is_quorum_reached(valset: &Valset, message: &MessageWithSignatures) -> bool {
    is_power_sufficient(signing_power(valset, &message.message.bytes_to_sign, &message.signatures))
}

pub fn is_power_sufficient(power: u64) -> bool {
    power >= QUORUM_POWER_THRESHOLD
}

/// 按 valset 顺序输出签名；缺失或无效的签名以全零占位，长度始终与 valset 一致
pub fn build_consensus_payload(
    valset: &Valset,
    bytes_to_sign: &[u8],
    signatures: &[ValidatorSignature],
) -> ConsensusPayload {
    let signatures = verified_components(valset, bytes_to_sign, signatures)
        .into_iter()
        .map(|components| components.unwrap_or(SignatureComponents::EMPTY))
        .collect();

    ConsensusPayload {
        valset: valset.clone(),
        signatures,
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use k256::ecdsa::SigningKey;
    use crate::types::ValsetMember;

    pub fn generate_key() -> SigningKey {
        SigningKey::random(&mut rand::thread_rng())
    }

    pub fn key_address(key: &SigningKey) -> String {
        format_address(&address_from_key(key.verifying_key()))
    }

    /// 65 字节签名，v 为 0/1
    pub fn sign(key: &SigningKey, bytes_to_sign: &[u8]) -> Vec<u8> {
        let digest = signed_digest(bytes_to_sign);
        let (sig, recovery_id) = key.sign_prehash_recoverable(&digest).expect("signing failed");
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        bytes
    }

    pub fn validator_signature(key: &SigningKey, bytes_to_sign: &[u8]) -> ValidatorSignature {
        ValidatorSignature {
            signer_address: key_address(key),
            signature: sign(key, bytes_to_sign),
            validator_address: vec![],
        }
    }

    pub fn valset(keys: &[&SigningKey], powers: &[u64]) -> Valset {
        Valset {
            valset_id: 1,
            validators: keys
                .iter()
                .zip(powers)
                .map(|(key, power)| ValsetMember { address: key_address(key), power: *power })
                .collect(),
        }
    }
}
