use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use log::{debug, error, info, warn};
use crate::{
    config::Config,
    election::{open_lane, LeaderElection},
    heartbeat::{BeatOutcome, Heartbeat},
    home::HomeChain,
    processor::{Processor, ProcessorRegistry},
    shutdown::Shutdown,
    types::{ChainInfo, ExternalAccount},
    Error,
};

mod bridge;
mod messages;

pub use bridge::batch_fingerprint;
pub use messages::select_relay_candidates;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Signing,
    Attesting,
    Relaying,
    Estimating,
    BridgeBatchSigning,
    BridgeBatchRelaying,
    BridgeBatchEstimating,
    BridgeEventHandling,
    ExternalChainInfo,
    KeepAlive,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Signing,
        Stage::Attesting,
        Stage::Relaying,
        Stage::Estimating,
        Stage::BridgeBatchSigning,
        Stage::BridgeBatchRelaying,
        Stage::BridgeBatchEstimating,
        Stage::BridgeEventHandling,
        Stage::ExternalChainInfo,
        Stage::KeepAlive,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Signing => "signing",
            Stage::Attesting => "attesting",
            Stage::Relaying => "relaying",
            Stage::Estimating => "estimating",
            Stage::BridgeBatchSigning => "bridge-batch-signing",
            Stage::BridgeBatchRelaying => "bridge-batch-relaying",
            Stage::BridgeBatchEstimating => "bridge-batch-estimating",
            Stage::BridgeEventHandling => "bridge-event-handling",
            Stage::ExternalChainInfo => "external-chain-info",
            Stage::KeepAlive => "keep-alive",
        };
        f.write_str(name)
    }
}

/// 非致命错误记录后继续；致命错误直接返回，中止当前阶段
pub(crate) fn collect_error(errors: &mut Vec<Error>, error: Error, context: &str) -> Result<(), Error> {
    if error.is_fatal() {
        error!("{}: {}", context, error);
        return Err(error);
    }
    warn!("{}: {}", context, error);
    errors.push(error);
    Ok(())
}

pub(crate) fn finish(errors: Vec<Error>) -> Result<(), Error> {
    match Error::aggregate(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub struct Relayer {
    config: Config,
    home: Arc<dyn HomeChain>,
    registry: ProcessorRegistry,
    processors: RwLock<Vec<Arc<dyn Processor>>>,
    chain_infos: Mutex<Option<Vec<ChainInfo>>>,
    external_accounts: Mutex<Option<Vec<ExternalAccount>>>,
    /// 所有改变链上状态的调用共用的锁
    chain_lock: Arc<Mutex<()>>,
    heartbeat: Heartbeat,
    election: Mutex<Option<Arc<LeaderElection>>>,
    staking: AtomicBool,
    shutdown: Shutdown,
}

impl Relayer {
    pub fn new(
        config: Config,
        home: Arc<dyn HomeChain>,
        registry: ProcessorRegistry,
        chain_lock: Arc<Mutex<()>>,
        shutdown: Shutdown,
    ) -> Self {
        let heartbeat = Heartbeat::new(
            home.clone(),
            chain_lock.clone(),
            config.heartbeat.clone(),
            config.relayer.max_retries,
            config.relayer.retry_delay(),
        );

        Self {
            config,
            home,
            registry,
            processors: RwLock::new(Vec::new()),
            chain_infos: Mutex::new(None),
            external_accounts: Mutex::new(None),
            chain_lock,
            heartbeat,
            election: Mutex::new(None),
            staking: AtomicBool::new(false),
            shutdown,
        }
    }

    /// 启动所有阶段，直到收到关闭信号或某个阶段任务异常退出
    pub async fn start(self: Arc<Self>) -> Result<(), Error> {
        info!("Starting relayer for validator {}", self.config.validator.address);
        // 主链暂时不可达时照常启动，由各阶段下一轮重试
        if let Err(e) = self.ensure_processors().await {
            if e.is_fatal() {
                error!("Failed to build processors: {}", e);
                return Err(e);
            }
            warn!("Failed to build processors, stages will retry: {}", e);
        }

        let mut tasks = JoinSet::new();
        for stage in Stage::ALL {
            let relayer = self.clone();
            tasks.spawn(async move { relayer.run_stage(stage).await });
        }

        let mut shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            _ = shutdown.wait() => Ok(()),
            Some(joined) = tasks.join_next() => match joined {
                Ok(()) if self.shutdown.is_shutdown() => Ok(()),
                Ok(()) => Err(Error::Fatal("Stage exited unexpectedly".to_string())),
                Err(e) => Err(Error::Fatal(format!("Stage task failed: {}", e))),
            },
        };

        tasks.shutdown().await;
        info!("Relayer stopped");
        outcome
    }

    fn interval(&self, stage: Stage) -> Duration {
        let relayer = &self.config.relayer;
        let secs = match stage {
            Stage::Signing => relayer.sign_interval,
            Stage::Attesting => relayer.attest_interval,
            Stage::Relaying => relayer.relay_interval,
            Stage::Estimating => relayer.estimate_interval,
            Stage::BridgeBatchSigning
            | Stage::BridgeBatchRelaying
            | Stage::BridgeBatchEstimating
            | Stage::BridgeEventHandling => relayer.bridge_interval,
            Stage::ExternalChainInfo => relayer.external_info_interval,
            Stage::KeepAlive => relayer.keep_alive_interval,
        };
        Duration::from_secs(secs)
    }

    async fn run_stage(&self, stage: Stage) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.interval(stage));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => return,
            }

            let result = tokio::select! {
                result = self.run_once(stage) => result,
                _ = shutdown.wait() => return,
            };

            match result {
                Ok(()) => debug!("Stage {} completed", stage),
                Err(e) if e.is_fatal() => error!("Stage {} aborted: {}", stage, e),
                Err(e) => warn!("Stage {} finished with errors: {}", stage, e),
            }
        }
    }

    /// 执行一次指定阶段
    pub async fn run_once(&self, stage: Stage) -> Result<(), Error> {
        // 保活不依赖外部链处理器
        if stage != Stage::KeepAlive {
            self.ensure_processors().await?;
        }

        match stage {
            Stage::Signing => self.sign_messages().await,
            Stage::Attesting => self.attest_messages().await,
            Stage::Relaying => self.relay_messages().await,
            Stage::Estimating => self.estimate_messages().await,
            Stage::BridgeBatchSigning => self.sign_bridge_batches().await,
            Stage::BridgeBatchRelaying => self.relay_bridge_batches().await,
            Stage::BridgeBatchEstimating => self.estimate_bridge_batches().await,
            Stage::BridgeEventHandling => self.handle_bridge_events().await,
            Stage::ExternalChainInfo => self.update_external_chain_infos().await,
            Stage::KeepAlive => self.keep_alive().await,
        }
    }

    pub(crate) async fn processors(&self) -> Vec<Arc<dyn Processor>> {
        self.processors.read().await.clone()
    }

    /// 链信息与缓存一致且处理器数量匹配时跳过重建
    pub async fn ensure_processors(&self) -> Result<(), Error> {
        let chains = self.home.query_chain_infos().await?;
        if self.is_current(&chains).await {
            return Ok(());
        }

        let _guard = self.chain_lock.lock().await;
        // 等锁期间可能已被其他阶段重建
        if self.is_current(&chains).await {
            return Ok(());
        }

        let mut built = Vec::with_capacity(chains.len());
        for chain in &chains {
            built.push(self.registry.build(chain).await?);
        }

        info!("Built {} processors", built.len());
        *self.processors.write().await = built;
        *self.chain_infos.lock().await = Some(chains);
        Ok(())
    }

    async fn is_current(&self, chains: &[ChainInfo]) -> bool {
        let cached = self.chain_infos.lock().await;
        let processors = self.processors.read().await;
        cached.as_deref() == Some(chains) && processors.len() == chains.len()
    }

    /// 复用当前周期的选举通道，已关闭则重新打开
    pub(crate) async fn leader_election(&self) -> Result<Arc<LeaderElection>, Error> {
        let mut current = self.election.lock().await;
        if let Some(lane) = current.as_ref() {
            if lane.is_open() {
                return Ok(lane.clone());
            }
        }

        let lane = Arc::new(
            open_lane(
                self.home.clone(),
                &self.config.validator.address,
                &self.config.election,
                self.shutdown.clone(),
            )
            .await?,
        );
        *current = Some(lane.clone());
        Ok(lane)
    }

    /// 上报本验证者在各外部链上的账户；与上次发送的一致时跳过
    pub async fn update_external_chain_infos(&self) -> Result<(), Error> {
        let accounts: Vec<ExternalAccount> = self
            .processors()
            .await
            .iter()
            .map(|p| p.external_account())
            .collect();

        if self.external_accounts.lock().await.as_ref() == Some(&accounts) {
            debug!("External chain infos unchanged, skipping update");
            return Ok(());
        }

        {
            let _guard = self.chain_lock.lock().await;
            self.home.add_external_chain_info(accounts.clone()).await?;
        }
        info!("Updated {} external chain accounts", accounts.len());
        *self.external_accounts.lock().await = Some(accounts);
        Ok(())
    }

    /// 只有质押中的验证者需要保活；质押状态随心跳缓存一起刷新
    pub async fn keep_alive(&self) -> Result<(), Error> {
        if self.heartbeat.is_stale().await {
            let staking = self.home.query_is_staking().await?;
            self.staking.store(staking, Ordering::SeqCst);
        }

        if !self.staking.load(Ordering::SeqCst) {
            debug!("Validator is not staking, skipping keep alive");
            return Ok(());
        }

        match self.heartbeat.beat().await? {
            BeatOutcome::Healthy { remaining_blocks } => {
                debug!("Validator alive for another {} blocks", remaining_blocks)
            }
            BeatOutcome::KeptAlive => info!("Keep alive sent"),
        }
        Ok(())
    }

    /// 质押中的验证者必须通过全部检查；未质押时主链不可达只记录警告
    pub async fn health_check(&self) -> Result<(), Error> {
        match self.home.query_is_staking().await {
            Ok(staking) => self.staking.store(staking, Ordering::SeqCst),
            Err(e) => {
                if self.staking.load(Ordering::SeqCst) {
                    error!("Home chain unreachable while staking: {}", e);
                    return Err(e);
                }
                warn!("Home chain unreachable, validator is not staking: {}", e);
                return Ok(());
            }
        }

        if !self.staking.load(Ordering::SeqCst) {
            warn!("Validator is not staking, skipping health checks");
            return Ok(());
        }

        self.ensure_processors().await?;
        let mut errors = Vec::new();
        for processor in self.processors().await {
            if let Err(e) = processor.health_check().await {
                let context = format!("Health check failed for {}", processor.chain_reference_id());
                collect_error(&mut errors, e, &context)?;
            }
        }
        finish(errors)
    }
}
