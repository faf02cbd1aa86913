//! 无通信的执行者选举。
//!
//! 所有实例使用相同的输入（有序验证者列表、量化后的高度、工作项指纹）独立计算，
//! 得到同一个唯一的执行者。折叠函数属于协议的一部分，各实例必须逐字节一致。

use crate::consensus::keccak256;

mod lane;

pub use lane::{open_lane, EpochContext, LeaderElection};

/// 放弃折叠、直接取模的轮数上限
const MAX_FOLD_ROUNDS: usize = 64;

/// 向下取整到 round_size 的整数倍
pub fn quantize(height: i64, round_size: i64) -> i64 {
    if round_size <= 0 {
        return height;
    }
    height - height.rem_euclid(round_size)
}

/// keccak256(十进制高度 || data)
pub fn fingerprint(quantized_height: i64, data: &[u8]) -> [u8; 32] {
    let height = quantized_height.to_string();
    let mut seed = Vec::with_capacity(height.len() + data.len());
    seed.extend_from_slice(height.as_bytes());
    seed.extend_from_slice(data);
    keccak256(&seed)
}

fn leading_u64(hash: &[u8; 32]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(bytes)
}

fn fold(seed: &[u8; 32], address: &str) -> u64 {
    let address_hash = keccak256(address.as_bytes());
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(seed);
    data[32..].copy_from_slice(&address_hash);
    leading_u64(&keccak256(&data))
}

/// 重新加盐：seed || keccak256(seed) 再取哈希
fn resalt(seed: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(seed);
    data[32..].copy_from_slice(&keccak256(seed));
    keccak256(&data)
}

/// 返回当选者在 `validators` 中的下标；列表为空时返回 None
pub fn elect_index(validators: &[String], quantized_height: i64, data: &[u8]) -> Option<usize> {
    if validators.is_empty() {
        return None;
    }

    let mut seed = fingerprint(quantized_height, data);
    let mut candidates: Vec<usize> = (0..validators.len()).collect();

    for _ in 0..MAX_FOLD_ROUNDS {
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }

        let width = candidates.len() as u64;
        let target = leading_u64(&seed) % width;
        let narrowed: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| fold(&seed, &validators[i]) % width == target)
            .collect();

        // 没有命中时保留原候选集，换盐重来
        if !narrowed.is_empty() {
            candidates = narrowed;
        }
        seed = resalt(&seed);
    }

    let target = (leading_u64(&seed) % candidates.len() as u64) as usize;
    Some(candidates[target])
}

pub fn elect<'a>(validators: &'a [String], quantized_height: i64, data: &[u8]) -> Option<&'a str> {
    elect_index(validators, quantized_height, data).map(|i| validators[i].as_str())
}
