use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use crate::Error;
use super::{Log, LogFilter, LogProvider};

/// JSON-RPC 返回的这些错误表示区间过大，可以拆分后重试
const LIMIT_MARKERS: [&str; 5] = [
    "query returned more than",
    "too many results",
    "block range",
    "response size exceeded",
    "limit exceeded",
];

const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// 通过 eth_blockNumber / eth_getLogs 访问 EVM 节点
pub struct JsonRpcLogProvider {
    client: reqwest::Client,
    rpc_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    transaction_hash: String,
    log_index: String,
}

fn parse_quantity(value: &str) -> Result<u64, Error> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("Invalid quantity {}: {}", value, e)))
}

fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn classify_rpc_error(error: &Value) -> Error {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let lowered = message.to_lowercase();
    if code == Some(LIMIT_EXCEEDED_CODE) || LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
        Error::QueryLimitExceeded(message)
    } else {
        Error::Chain(format!("RPC error {:?}: {}", code, message))
    }
}

fn filter_params(filter: &LogFilter) -> Value {
    let mut params = serde_json::Map::new();
    match &filter.block_hash {
        Some(hash) => {
            params.insert("blockHash".to_string(), json!(hash));
        }
        None => {
            if let Some(from) = filter.from_block {
                params.insert("fromBlock".to_string(), json!(to_quantity(from)));
            }
            if let Some(to) = filter.to_block {
                params.insert("toBlock".to_string(), json!(to_quantity(to)));
            }
        }
    }
    if !filter.addresses.is_empty() {
        params.insert("address".to_string(), json!(filter.addresses));
    }
    if !filter.topics.is_empty() {
        params.insert("topics".to_string(), json!(filter.topics));
    }
    Value::Object(params)
}

impl JsonRpcLogProvider {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let result: Value = response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if let Some(error) = result.get("error") {
            return Err(classify_rpc_error(error));
        }

        result
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Chain(format!("Missing result for {}", method)))
    }
}

#[async_trait]
impl LogProvider for JsonRpcLogProvider {
    async fn block_number(&self) -> Result<u64, Error> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| Error::Serialization("eth_blockNumber result is not a string".to_string()))?;
        parse_quantity(quantity)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, Error> {
        let result = self.call("eth_getLogs", json!([filter_params(filter)])).await?;
        let logs: Vec<RpcLog> =
            serde_json::from_value(result).map_err(|e| Error::Serialization(e.to_string()))?;

        logs.into_iter()
            .map(|log| -> Result<Log, Error> {
                Ok(Log {
                    block_number: parse_quantity(&log.block_number)?,
                    log_index: parse_quantity(&log.log_index)?,
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    transaction_hash: log.transaction_hash,
                })
            })
            .collect()
    }
}
