//! 优惠过期清扫 Worker
//!
//! 以固定间隔轮询数据库，把有效期已过的 active 优惠批量转为 expired。
//! 清扫底层使用 `FOR UPDATE SKIP LOCKED`，多实例部署时不会重复处理；
//! 清扫本身幂等，漏掉一轮只会延迟过期，不会产生错误状态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info};

use loyalty_shared::config::WorkerConfig;
use loyalty_shared::observability::metrics;

use crate::service::LoyaltyEngineService;

/// 优惠过期清扫 Worker
pub struct OfferExpiryWorker {
    engine: Arc<LoyaltyEngineService>,
    /// 轮询间隔（建议 300 秒）
    poll_interval: Duration,
    /// 每批处理的最大记录数
    batch_size: i64,
}

impl OfferExpiryWorker {
    pub fn new(engine: Arc<LoyaltyEngineService>, poll_interval_secs: u64, batch_size: i64) -> Self {
        Self {
            engine,
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_size,
        }
    }

    /// 从配置创建 Worker
    pub fn from_config(engine: Arc<LoyaltyEngineService>, config: &WorkerConfig) -> Self {
        Self::new(engine, config.poll_interval_seconds, config.batch_size)
    }

    /// 主循环：持续清扫直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "OfferExpiryWorker 已启动"
        );

        loop {
            self.sweep_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 执行一轮清扫并记录指标
    ///
    /// 单轮失败只记录错误，下一轮重试
    pub async fn sweep_once(&self) {
        let today = Utc::now().date_naive();
        let started = Instant::now();

        match self.engine.expire_stale_offers(today, self.batch_size).await {
            Ok(expired) => {
                let elapsed = started.elapsed().as_secs_f64();
                metrics::record_expiry_sweep(expired, elapsed);
                if expired > 0 {
                    info!(expired, elapsed_secs = elapsed, "过期清扫轮次完成");
                }
            }
            Err(e) => {
                error!(error = %e, "过期清扫轮次失败");
            }
        }
    }
}
