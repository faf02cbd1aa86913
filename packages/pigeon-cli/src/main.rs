use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pigeon_core::{
    election::{quantize, EpochContext, LeaderElection},
    scanner::{scan_logs, JsonRpcLogProvider, LogFilter, ScanControl},
    Config, ShutdownHandle,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 离线计算某个任务在指定高度的当选验证者
    Elect {
        /// 快照中的验证者地址，按快照顺序用逗号分隔
        #[arg(long, value_delimiter = ',', required = true)]
        validators: Vec<String>,
        /// 本验证者地址
        #[arg(long)]
        self_address: String,
        /// 主链高度
        #[arg(long)]
        height: i64,
        /// 任务指纹
        #[arg(long)]
        fingerprint: String,
        /// 选举周期的区块数
        #[arg(long, default_value_t = 10)]
        round_size: i64,
    },
    /// 分段拉取 EVM 链上的事件日志
    ScanLogs {
        /// JSON-RPC 节点地址
        #[arg(long, required_unless_present = "config", conflicts_with = "config")]
        rpc_url: Option<String>,
        /// 配置文件路径，从中读取外部链的 RPC 地址
        #[arg(short, long, value_name = "FILE", requires = "chain")]
        config: Option<PathBuf>,
        /// 配置文件中的链引用 ID
        #[arg(long, requires = "config")]
        chain: Option<String>,
        /// 合约地址
        #[arg(long)]
        address: Vec<String>,
        /// 起始区块，默认从 0 开始
        #[arg(long)]
        from: Option<u64>,
        /// 结束区块，默认到最新区块
        #[arg(long)]
        to: Option<u64>,
    },
}

fn validate_config(path: PathBuf) -> Result<()> {
    info!("正在验证配置文件: {:?}", path);
    let config = Config::load(path)?;
    println!("配置文件验证成功!");
    println!("配置内容概要:");
    println!("- 验证者地址: {}", config.validator.address);
    println!("- 外部链:");
    for chain in &config.chains {
        println!("  - {} ({}): {}", chain.chain_reference_id, chain.chain_type, chain.rpc_url);
    }
    println!("- 中继器配置:");
    println!("  - 签名间隔: {}秒", config.relayer.sign_interval);
    println!("  - 中继间隔: {}秒", config.relayer.relay_interval);
    println!("  - 跨链批次间隔: {}秒", config.relayer.bridge_interval);
    println!("  - 保活间隔: {}秒", config.relayer.keep_alive_interval);
    println!("  - 最大重试次数: {}", config.relayer.max_retries);
    println!("  - 重试延迟: {}毫秒", config.relayer.retry_delay_ms);
    println!("- 保活阈值: {}个区块", config.heartbeat.keep_alive_threshold_blocks);
    println!("- 选举周期: {}个区块", config.election.round_size);
    Ok(())
}

fn elect(
    validators: Vec<String>,
    self_address: String,
    height: i64,
    fingerprint: String,
    round_size: i64,
) -> Result<()> {
    if round_size <= 0 {
        bail!("round size must be positive");
    }
    if !validators.contains(&self_address) {
        warn!("本验证者 {} 不在验证者列表中", self_address);
    }

    let lane = LeaderElection::fixed(EpochContext {
        self_address,
        validators,
        quantized_height: quantize(height, round_size),
    });

    println!("量化高度: {}", lane.context().quantized_height);
    match lane.winner(fingerprint.as_bytes()) {
        Some(winner) => println!("当选验证者: {}", winner),
        None => println!("当选验证者: 无"),
    }
    println!("本验证者可执行: {}", lane.allowed_to_execute(fingerprint.as_bytes())?);
    Ok(())
}

/// 命令行直接给出的地址优先，否则从配置文件按链查找
fn resolve_rpc_url(rpc_url: Option<String>, config: Option<PathBuf>, chain: Option<String>) -> Result<String> {
    match (rpc_url, config, chain) {
        (Some(rpc_url), _, _) => Ok(rpc_url),
        (None, Some(path), Some(chain)) => {
            let config = Config::load(path)?;
            Ok(config.rpc_url(&chain)?.to_string())
        }
        _ => bail!("either --rpc-url or --config with --chain is required"),
    }
}

async fn scan(rpc_url: String, addresses: Vec<String>, from: Option<u64>, to: Option<u64>) -> Result<()> {
    let provider = JsonRpcLogProvider::new(&rpc_url);
    let filter = LogFilter {
        from_block: from,
        to_block: to,
        addresses,
        ..Default::default()
    };

    let (handle, mut shutdown) = ShutdownHandle::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    let mut total = 0usize;
    let scanning = scan_logs(&provider, &filter, |logs| {
        total += logs.len();
        for log in logs {
            match serde_json::to_string(&log) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("无法序列化日志: {}", e),
            }
        }
        ScanControl::Continue
    });

    tokio::select! {
        result = scanning => {
            result?;
        }
        _ = shutdown.wait() => {
            warn!("收到中断信号，停止扫描");
        }
    }

    info!("共拉取 {} 条日志", total);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => validate_config(config),
        Commands::Elect {
            validators,
            self_address,
            height,
            fingerprint,
            round_size,
        } => elect(validators, self_address, height, fingerprint, round_size),
        Commands::ScanLogs {
            rpc_url,
            config,
            chain,
            address,
            from,
            to,
        } => {
            let rpc_url = resolve_rpc_url(rpc_url, config, chain)?;
            scan(rpc_url, address, from, to).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_logs_requires_rpc_source() {
        assert!(Cli::try_parse_from(["pigeon", "scan-logs"]).is_err());
        assert!(Cli::try_parse_from(["pigeon", "scan-logs", "--config", "pigeon.toml"]).is_err());
        assert!(Cli::try_parse_from(["pigeon", "scan-logs", "--rpc-url", "http://localhost:8545"]).is_ok());
    }

    #[test]
    fn test_rpc_url_resolved_from_config() {
        let path = std::env::temp_dir().join(format!("pigeon-cli-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[validator]
address = "palomavaloper1xyz"

[[chains]]
chain_reference_id = "bnb-main"
chain_type = "evm"
rpc_url = "http://localhost:8546"
"#,
        )
        .unwrap();

        let url = resolve_rpc_url(None, Some(path.clone()), Some("bnb-main".to_string())).unwrap();
        assert_eq!(url, "http://localhost:8546");
        assert!(resolve_rpc_url(None, Some(path.clone()), Some("eth-main".to_string())).is_err());
        let url = resolve_rpc_url(Some("http://override".to_string()), None, None).unwrap();
        assert_eq!(url, "http://override");

        std::fs::remove_file(path).ok();
    }
}
