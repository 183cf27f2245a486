//! 忠诚度服务入口
//!
//! 加载配置、初始化可观测性与存储连接、执行数据库迁移，
//! 然后运行优惠过期清扫 Worker 直到收到退出信号。
//! 业务操作面是库内服务层的公开方法，由上层传输层（不在本服务内）调用。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use loyalty_shared::{cache::Cache, config::AppConfig, database::Database, observability};

use loyalty_service::{
    OfferExpiryWorker, OfferRepository, PgVehicleDirectory, VehicleOfferRepository,
    VehicleStatsRepository, service::LoyaltyEngineService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：config/default.toml + 环境 + 服务特定配置 + WASH_ 环境变量
    let config = AppConfig::load("loyalty-service").unwrap_or_else(|e| {
        eprintln!("配置加载失败，使用默认配置: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性（tracing + /metrics 端点）
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        "loyalty-service 启动中"
    );

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("./migrations").run(db.pool()).await?;
    let pool = db.pool().clone();
    info!("数据库连接就绪，迁移已执行");

    // 4. 初始化 Redis 缓存
    let cache = Arc::new(Cache::new(&config.redis)?);
    cache.health_check().await?;
    info!("Redis 连接就绪");

    // 5. 创建仓储与发放引擎
    let offer_repo = Arc::new(OfferRepository::new(pool.clone()));
    let vehicle_offer_repo = Arc::new(VehicleOfferRepository::new(pool.clone()));
    let stats_repo = Arc::new(VehicleStatsRepository::new(pool.clone()));
    let directory = Arc::new(PgVehicleDirectory::new(pool.clone()));

    let engine = Arc::new(LoyaltyEngineService::new(
        offer_repo,
        vehicle_offer_repo,
        stats_repo,
        directory,
        cache,
        pool,
    ));
    info!("发放引擎就绪");

    // 6. 启动过期清扫 Worker
    let worker_handle = if config.worker.enabled {
        let worker = OfferExpiryWorker::from_config(engine, &config.worker);
        Some(tokio::spawn(async move { worker.run().await }))
    } else {
        info!("过期清扫 Worker 已按配置禁用");
        None
    };

    // 7. 等待退出信号
    shutdown_signal().await;

    if let Some(handle) = worker_handle {
        handle.abort();
    }
    db.close().await;

    info!("loyalty-service 已退出");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到 Ctrl+C，开始优雅关闭");
        }
        _ = terminate => {
            info!("收到 SIGTERM，开始优雅关闭");
        }
    }
}
