use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use log::{debug, info};
use crate::{config::HeartbeatConfig, home::HomeChain, retry::retry_with_falloff, Error};

/// 存活高度与区块速度的缓存，避免每次心跳都查询主链
#[derive(Debug, Clone, Default)]
pub struct HeartbeatCacheEntry {
    pub last_alive_until_height: Option<i64>,
    pub last_observed_height: Option<i64>,
    pub last_refresh: Option<Instant>,
    pub estimated_block_duration: Option<Duration>,
}

/// 根据前后两次观测估算出块间隔。没有上一次观测、高度未增长或时间倒退时使用默认值
pub fn estimate_block_duration(
    previous: Option<(i64, Instant)>,
    current: (i64, Instant),
    default: Duration,
) -> Duration {
    let Some((prev_height, prev_time)) = previous else {
        return default;
    };
    let (height, time) = current;
    if height <= prev_height || time <= prev_time {
        return default;
    }

    // 高度差可能超出 u32，按纳秒在 u128 上计算
    let blocks = height.abs_diff(prev_height) as u128;
    match u64::try_from((time - prev_time).as_nanos() / blocks) {
        Ok(0) | Err(_) => default,
        Ok(nanos) => Duration::from_nanos(nanos),
    }
}

impl HeartbeatCacheEntry {
    pub fn is_stale(&self, now: Instant, refresh_interval_blocks: u64) -> bool {
        let (Some(_), Some(_), Some(last_refresh), Some(block_duration)) = (
            self.last_alive_until_height,
            self.last_observed_height,
            self.last_refresh,
            self.estimated_block_duration,
        ) else {
            return true;
        };

        let elapsed = now.saturating_duration_since(last_refresh);
        let elapsed_blocks = elapsed.as_millis() / block_duration.as_millis().max(1);
        elapsed_blocks >= refresh_interval_blocks as u128
    }

    /// 不访问网络，按估算的出块间隔外推当前高度
    pub fn estimate_current_height(&self, now: Instant) -> Option<i64> {
        let height = self.last_observed_height?;
        let last_refresh = self.last_refresh?;
        let block_duration = self.estimated_block_duration?;

        let elapsed = now.saturating_duration_since(last_refresh);
        let blocks = elapsed.as_millis() / block_duration.as_millis().max(1);
        Some(height + blocks as i64)
    }

    pub fn update(&mut self, alive_until_height: i64, height: i64, now: Instant, default_duration: Duration) {
        let previous = self.last_observed_height.zip(self.last_refresh);
        self.estimated_block_duration = Some(estimate_block_duration(previous, (height, now), default_duration));
        self.last_alive_until_height = Some(alive_until_height);
        self.last_observed_height = Some(height);
        self.last_refresh = Some(now);
    }

    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatOutcome {
    /// 距离截止高度还有足够的区块
    Healthy { remaining_blocks: i64 },
    KeptAlive,
}

pub struct Heartbeat {
    home: Arc<dyn HomeChain>,
    cache: Mutex<HeartbeatCacheEntry>,
    chain_lock: Arc<Mutex<()>>,
    config: HeartbeatConfig,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Heartbeat {
    pub fn new(
        home: Arc<dyn HomeChain>,
        chain_lock: Arc<Mutex<()>>,
        config: HeartbeatConfig,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            home,
            cache: Mutex::new(HeartbeatCacheEntry::default()),
            chain_lock,
            config,
            max_attempts,
            retry_delay,
        }
    }

    fn default_block_duration(&self) -> Duration {
        Duration::from_millis(self.config.default_block_duration_ms)
    }

    pub async fn is_stale(&self) -> bool {
        self.cache
            .lock()
            .await
            .is_stale(Instant::now(), self.config.refresh_interval_blocks)
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.invalidate();
    }

    pub async fn estimate_current_height(&self) -> Option<i64> {
        self.cache.lock().await.estimate_current_height(Instant::now())
    }

    pub async fn snapshot(&self) -> HeartbeatCacheEntry {
        self.cache.lock().await.clone()
    }

    /// 在共享锁内重新查询存活截止高度与当前高度
    pub async fn refresh(&self) -> Result<(), Error> {
        let _guard = self.chain_lock.lock().await;
        let alive_until = self.home.query_alive_until_height().await?;
        let height = self.home.block_height().await?;

        let mut cache = self.cache.lock().await;
        cache.update(alive_until, height, Instant::now(), self.default_block_duration());
        debug!(
            "Heartbeat cache refreshed: alive until {}, height {}, block duration {:?}",
            alive_until, height, cache.estimated_block_duration
        );
        Ok(())
    }

    pub async fn beat(&self) -> Result<BeatOutcome, Error> {
        if self.is_stale().await {
            retry_with_falloff("heartbeat refresh", self.max_attempts, self.retry_delay, || self.refresh()).await?;
        }

        let (alive_until, estimated_height) = {
            let cache = self.cache.lock().await;
            let alive_until = cache
                .last_alive_until_height
                .ok_or_else(|| Error::Chain("Heartbeat cache is empty after refresh".to_string()))?;
            let estimated = cache
                .estimate_current_height(Instant::now())
                .ok_or_else(|| Error::Chain("Heartbeat cache is empty after refresh".to_string()))?;
            (alive_until, estimated)
        };

        let remaining_blocks = alive_until - estimated_height;
        if remaining_blocks >= self.config.keep_alive_threshold_blocks {
            return Ok(BeatOutcome::Healthy { remaining_blocks });
        }

        info!(
            "Validator alive until {} with estimated height {}, sending keep alive",
            alive_until, estimated_height
        );
        retry_with_falloff("keep alive", self.max_attempts, self.retry_delay, || async move {
            let _guard = self.chain_lock.lock().await;
            self.home.keep_alive().await
        })
        .await?;

        // 存活截止高度已变化，下次心跳重新查询
        self.invalidate().await;
        Ok(BeatOutcome::KeptAlive)
    }
}
