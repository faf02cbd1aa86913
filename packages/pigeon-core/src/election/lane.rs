use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use crate::{config::ElectionConfig, home::HomeChain, shutdown::Shutdown, Error};
use super::{elect, quantize};

/// 连续轮询失败达到该次数后关闭通道
const MAX_POLL_FAILURES: u32 = 3;

/// 一个选举周期内所有实例共享的输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochContext {
    pub self_address: String,
    pub validators: Vec<String>,
    pub quantized_height: i64,
}

/// 一条选举通道：在量化高度变化前有效，变化后自动关闭，调用方需重新打开
#[derive(Debug)]
pub struct LeaderElection {
    context: EpochContext,
    closed: watch::Receiver<bool>,
    watcher: Option<JoinHandle<()>>,
    /// 固定通道自己持有发送端，使其保持打开
    _fixed_sender: Option<watch::Sender<bool>>,
}

/// 查询快照与当前高度并启动后台高度观察任务；任一查询失败则通道不打开
pub async fn open_lane(
    home: Arc<dyn HomeChain>,
    self_address: &str,
    config: &ElectionConfig,
    shutdown: Shutdown,
) -> Result<LeaderElection, Error> {
    if config.poll_interval_ms == 0 {
        return Err(Error::Config("election poll_interval_ms must be positive".to_string()));
    }

    let snapshot = home.query_snapshot(0).await?;
    let height = home.block_height().await?;
    let quantized_height = quantize(height, config.round_size);

    let context = EpochContext {
        self_address: self_address.to_string(),
        validators: snapshot.validator_addresses(),
        quantized_height,
    };
    debug!(quantized_height, validators = context.validators.len(), "opened election lane");

    let (tx, rx) = watch::channel(false);
    let watcher = tokio::spawn(watch_height(
        home,
        quantized_height,
        config.round_size,
        Duration::from_millis(config.poll_interval_ms),
        tx,
        shutdown,
    ));

    Ok(LeaderElection {
        context,
        closed: rx,
        watcher: Some(watcher),
        _fixed_sender: None,
    })
}

async fn watch_height(
    home: Arc<dyn HomeChain>,
    quantized_height: i64,
    round_size: i64,
    poll_interval: Duration,
    closed: watch::Sender<bool>,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match home.block_height().await {
                    Ok(height) if quantize(height, round_size) != quantized_height => {
                        debug!(height, quantized_height, "epoch advanced, closing election lane");
                        break;
                    }
                    Ok(_) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        warn!(error = %e, failures, "failed to poll block height for election lane");
                        // 无法确认周期时按已关闭处理
                        if failures >= MAX_POLL_FAILURES {
                            break;
                        }
                    }
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    let _ = closed.send(true);
}

impl LeaderElection {
    /// 不带后台观察的固定通道，用于离线计算
    pub fn fixed(context: EpochContext) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            context,
            closed: rx,
            watcher: None,
            _fixed_sender: Some(tx),
        }
    }

    pub fn context(&self) -> &EpochContext {
        &self.context
    }

    /// 观察任务异常退出（发送端被丢弃）同样视为关闭
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow() && self.closed.has_changed().is_ok()
    }

    /// 通道关闭后继续使用是调用方的编程错误
    pub fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::LaneClosed)
        }
    }

    pub fn winner(&self, fingerprint: &[u8]) -> Option<&str> {
        elect(&self.context.validators, self.context.quantized_height, fingerprint)
    }

    pub fn allowed_to_execute(&self, fingerprint: &[u8]) -> Result<bool, Error> {
        self.ensure_open()?;
        Ok(self.winner(fingerprint) == Some(self.context.self_address.as_str()))
    }

    /// 等待通道关闭
    pub async fn closed(&mut self) {
        while !*self.closed.borrow_and_update() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
