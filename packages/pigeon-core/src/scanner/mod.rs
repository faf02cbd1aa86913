//! 分段拉取外部链事件日志。数据源拒绝过大的区间时对半拆分，先低后高依次拉取。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::debug;
use crate::Error;

mod json_rpc;

pub use json_rpc::JsonRpcLogProvider;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// 设置后只查询该区块，不做拆分
    pub block_hash: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub topics: Vec<Option<Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
}

#[async_trait]
pub trait LogProvider: Send + Sync {
    async fn block_number(&self) -> Result<u64, Error>;

    /// 结果过多时返回 `Error::QueryLimitExceeded`
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// 拉取过滤条件内的全部日志，每批结果交给 `on_batch`；回调返回 Stop 时提前结束
pub async fn scan_logs<F>(
    provider: &dyn LogProvider,
    filter: &LogFilter,
    mut on_batch: F,
) -> Result<ScanControl, Error>
where
    F: FnMut(Vec<Log>) -> ScanControl + Send,
{
    if filter.block_hash.is_some() {
        let logs = provider.get_logs(filter).await?;
        return Ok(on_batch(logs));
    }

    let to_block = match filter.to_block {
        Some(block) => block,
        None => provider.block_number().await?,
    };
    let from_block = filter.from_block.unwrap_or(0);
    if from_block > to_block {
        return Ok(ScanControl::Continue);
    }

    // 栈顶总是较低的区间
    let mut pending = vec![(from_block, to_block)];
    while let Some((from, to)) = pending.pop() {
        let window = LogFilter {
            from_block: Some(from),
            to_block: Some(to),
            ..filter.clone()
        };

        match provider.get_logs(&window).await {
            Ok(logs) => {
                debug!("Fetched {} logs in [{}, {}]", logs.len(), from, to);
                if on_batch(logs) == ScanControl::Stop {
                    return Ok(ScanControl::Stop);
                }
            }
            Err(Error::QueryLimitExceeded(reason)) if to > from => {
                let mid = from + (to - from) / 2;
                debug!("Range [{}, {}] too large ({}), splitting at {}", from, to, reason, mid);
                pending.push((mid + 1, to));
                pending.push((from, mid));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ScanControl::Continue)
}

pub async fn collect_logs(provider: &dyn LogProvider, filter: &LogFilter) -> Result<Vec<Log>, Error> {
    let mut all = Vec::new();
    scan_logs(provider, filter, |logs| {
        all.extend(logs);
        ScanControl::Continue
    })
    .await?;
    Ok(all)
}
