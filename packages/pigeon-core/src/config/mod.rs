use serde::{Deserialize, Serialize};
use std::path::Path;
use std::collections::HashSet;
use std::time::Duration;
use crate::{
    retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS},
    types::ChainType,
    Error,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub chain_reference_id: String,
    pub chain_type: ChainType,
    pub rpc_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValidatorConfig {
    /// 主链验证者地址
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    pub sign_interval: u64,
    pub attest_interval: u64,
    pub relay_interval: u64,
    pub estimate_interval: u64,
    pub bridge_interval: u64,
    pub external_info_interval: u64,
    pub keep_alive_interval: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            sign_interval: 5,
            attest_interval: 5,
            relay_interval: 5,
            estimate_interval: 5,
            bridge_interval: 10,
            external_info_interval: 30,
            keep_alive_interval: 5,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl RelayerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HeartbeatConfig {
    pub refresh_interval_blocks: u64,
    pub keep_alive_threshold_blocks: i64,
    pub default_block_duration_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            refresh_interval_blocks: 20,
            keep_alive_threshold_blocks: 100,
            default_block_duration_ms: 1620,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ElectionConfig {
    pub round_size: i64,
    pub poll_interval_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            round_size: 10,
            poll_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl Config {
    /// 按扩展名加载 JSON 或 TOML 配置文件
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
            _ => serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.validator.address.trim().is_empty() {
            return Err(Error::Config("Validator address must not be empty".to_string()));
        }

        // 链引用 ID 必须唯一
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.chain_reference_id.is_empty() {
                return Err(Error::Config("Chain reference id must not be empty".to_string()));
            }
            if !seen.insert(chain.chain_reference_id.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate chain reference id: {}",
                    chain.chain_reference_id
                )));
            }
            if chain.rpc_url.is_empty() {
                return Err(Error::Config(format!(
                    "Missing rpc url for chain: {}",
                    chain.chain_reference_id
                )));
            }
        }

        let relayer = &self.relayer;
        let intervals = [
            ("sign_interval", relayer.sign_interval),
            ("attest_interval", relayer.attest_interval),
            ("relay_interval", relayer.relay_interval),
            ("estimate_interval", relayer.estimate_interval),
            ("bridge_interval", relayer.bridge_interval),
            ("external_info_interval", relayer.external_info_interval),
            ("keep_alive_interval", relayer.keep_alive_interval),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("Relayer {} must be greater than 0", name)));
            }
        }
        if relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }

        if self.heartbeat.refresh_interval_blocks == 0 {
            return Err(Error::Config("Heartbeat refresh interval must be greater than 0".to_string()));
        }
        if self.heartbeat.default_block_duration_ms == 0 {
            return Err(Error::Config("Default block duration must be greater than 0".to_string()));
        }
        if self.election.round_size <= 0 {
            return Err(Error::Config("Election round size must be greater than 0".to_string()));
        }
        if self.election.poll_interval_ms == 0 {
            return Err(Error::Config("Election poll interval must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn get_chain_config(&self, chain_reference_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_reference_id == chain_reference_id)
    }

    /// 外部链 RPC 地址，未配置时报错
    pub fn rpc_url(&self, chain_reference_id: &str) -> Result<&str, Error> {
        self.get_chain_config(chain_reference_id)
            .map(|c| c.rpc_url.as_str())
            .ok_or_else(|| Error::Config(format!("Chain not configured: {}", chain_reference_id)))
    }
}
