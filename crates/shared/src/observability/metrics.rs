//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    // 构建 Prometheus recorder
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    // 注册服务级别的指标描述
    register_common_metrics(service_name);

    // 启动指标 HTTP 服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标（预定义的业务指标）
fn register_common_metrics(service_name: &str) {
    // 指标描述会出现在 /metrics 端点的 HELP 注释中

    metrics::describe_counter!("visits_recorded_total", "Total number of visits recorded");
    metrics::describe_counter!(
        "loyalty_offers_issued_total",
        "Total number of loyalty offers issued"
    );
    metrics::describe_counter!(
        "loyalty_offers_redeemed_total",
        "Total number of loyalty offers redeemed"
    );
    metrics::describe_counter!(
        "loyalty_offers_expired_total",
        "Total number of loyalty offers expired"
    );
    metrics::describe_histogram!(
        "expiry_sweep_duration_seconds",
        "Duration of the stale offer expiry sweep in seconds"
    );
    metrics::describe_gauge!(
        "expiry_sweep_last_run_timestamp",
        "Unix timestamp of the last completed expiry sweep"
    );

    // 记录服务启动
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次到店访问
#[inline]
pub fn record_visit_recorded() {
    metrics::counter!("visits_recorded_total").increment(1);
}

/// 记录一次优惠发放
#[inline]
pub fn record_offer_issued(offer_id: i64, source: &str) {
    metrics::counter!(
        "loyalty_offers_issued_total",
        "offer_id" => offer_id.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// 记录一次优惠核销
#[inline]
pub fn record_offer_redeemed(offer_id: i64) {
    metrics::counter!(
        "loyalty_offers_redeemed_total",
        "offer_id" => offer_id.to_string()
    )
    .increment(1);
}

/// 记录优惠过期数量
#[inline]
pub fn record_offers_expired(count: u64, source: &str) {
    metrics::counter!(
        "loyalty_offers_expired_total",
        "source" => source.to_string()
    )
    .increment(count);
}

/// 记录一次过期清扫的结果
#[inline]
pub fn record_expiry_sweep(expired: u64, duration_secs: f64) {
    metrics::histogram!("expiry_sweep_duration_seconds").record(duration_secs);
    metrics::gauge!("expiry_sweep_last_run_timestamp")
        .set(chrono::Utc::now().timestamp() as f64);
    if expired > 0 {
        record_offers_expired(expired, "sweep");
    }
}
