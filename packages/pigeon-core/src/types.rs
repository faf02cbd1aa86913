use serde::{Deserialize, Serialize};
use std::fmt;

/// 主链排队等待跨链处理的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: u64,
    pub nonce: Vec<u8>,
    pub bytes_to_sign: Vec<u8>,
    pub payload: MessagePayload,
}

/// 主链消息的具体类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    SubmitLogicCall {
        hex_contract_address: String,
        abi: Vec<u8>,
        payload: Vec<u8>,
        deadline: i64,
        sender_address: Vec<u8>,
    },
    UpdateValset {
        valset: Valset,
    },
    UploadSmartContract {
        id: u64,
        abi: String,
        bytecode: Vec<u8>,
        constructor_input: Vec<u8>,
    },
    UploadUserSmartContract {
        bytecode: Vec<u8>,
        deployer: String,
        block_height: i64,
    },
    CompassHandover {
        forward_calls: Vec<Vec<u8>>,
        deadline: i64,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::SubmitLogicCall { .. } => "submit_logic_call",
            MessagePayload::UpdateValset { .. } => "update_valset",
            MessagePayload::UploadSmartContract { .. } => "upload_smart_contract",
            MessagePayload::UploadUserSmartContract { .. } => "upload_user_smart_contract",
            MessagePayload::CompassHandover { .. } => "compass_handover",
        }
    }

    /// 需要外部链合约验证签名集合的消息；部署类消息在合约存在前没有签名者集合
    pub fn requires_consensus(&self) -> bool {
        matches!(
            self,
            MessagePayload::SubmitLogicCall { .. }
                | MessagePayload::UpdateValset { .. }
                | MessagePayload::CompassHandover { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    /// 外部链上的签名者地址（十六进制）
    pub signer_address: String,
    /// 65 字节可恢复签名 r || s || v
    pub signature: Vec<u8>,
    /// 主链验证者地址
    pub validator_address: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithSignatures {
    pub message: QueuedMessage,
    pub signatures: Vec<ValidatorSignature>,
    #[serde(default)]
    pub public_access_data: Vec<u8>,
    #[serde(default)]
    pub error_data: Vec<u8>,
}

impl MessageWithSignatures {
    pub fn id(&self) -> u64 {
        self.message.id
    }

    /// 是否已经写回执行结果
    pub fn has_evidence(&self) -> bool {
        !self.public_access_data.is_empty() || !self.error_data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValsetMember {
    pub address: String,
    pub power: u64,
}

/// 某一时刻有效的签名者集合，顺序即为共识载荷的顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valset {
    pub valset_id: u64,
    pub validators: Vec<ValsetMember>,
}

impl Valset {
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.validators.iter().map(|v| v.power).sum()
    }
}

/// 签名分量，缺失的签名以全零占位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureComponents {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignatureComponents {
    pub const EMPTY: SignatureComponents = SignatureComponents { v: 0, r: [0; 32], s: [0; 32] };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPayload {
    pub valset: Valset,
    pub signatures: Vec<SignatureComponents>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedQueuedMessage {
    pub queue_type_name: String,
    pub message: QueuedMessage,
    pub signature: Vec<u8>,
    pub signed_by_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Evm,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainType::Evm => write!(f, "evm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_reference_id: String,
    pub chain_type: ChainType,
    pub chain_id: u64,
    pub smart_contract_address: String,
    pub min_on_chain_balance: String,
    pub reference_block_height: u64,
    pub reference_block_hash: String,
}

/// 本验证者在某条外部链上的身份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub chain_type: ChainType,
    pub chain_reference_id: String,
    pub address: String,
    pub pub_key: Vec<u8>,
    #[serde(default)]
    pub traits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithEstimate {
    pub queue_type_name: String,
    pub message_id: u64,
    pub estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotValidator {
    pub address: String,
    pub share_count: u64,
    #[serde(default)]
    pub external_accounts: Vec<ExternalAccount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub height: i64,
    pub validators: Vec<SnapshotValidator>,
}

impl Snapshot {
    pub fn validator_addresses(&self) -> Vec<String> {
        self.validators.iter().map(|v| v.address.clone()).collect()
    }

    /// 验证者在快照中的下标，用于静态分片
    pub fn offset_of(&self, address: &str) -> Option<usize> {
        self.validators.iter().position(|v| v.address == address)
    }
}

/// 待签名/中继的出站批量转账
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeBatch {
    pub nonce: u64,
    pub chain_reference_id: String,
    pub bytes_to_sign: Vec<u8>,
    #[serde(default)]
    pub signatures: Vec<ValidatorSignature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBridgeBatch {
    pub batch: BridgeBatch,
    pub signature: Vec<u8>,
    pub signed_by_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeBatchEstimate {
    pub chain_reference_id: String,
    pub nonce: u64,
    pub estimate: u64,
}
