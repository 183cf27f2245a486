//! 到店台账服务
//!
//! 维护每辆车的到店计数：累计到店数、自上次核销以来的连续到店数、
//! 优惠获得/使用累计。到店记录是发放评估的输入，记录完成后由调用方
//! 触发 `LoyaltyEngineService::evaluate_and_issue`。
//!
//! 计数更新全部落在仓储层的单语句原子 SQL 上，本层负责车辆定位、
//! 参数校验与不变量保护。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use validator::Validate;

use loyalty_shared::cache::Cache;
use loyalty_shared::observability::metrics;

use crate::directory::{VehicleAttrs, VehicleDirectory};
use crate::error::{LoyaltyError, Result};
use crate::models::VehicleStats;
use crate::repository::VehicleStatsRepositoryTrait;
use crate::service::dto::{AdjustStatsRequest, RecordVisitRequest, VehicleRef};

/// 缓存键生成
mod cache_keys {
    pub fn vehicle_stats(vehicle_id: i64) -> String {
        format!("vehicle:stats:{}", vehicle_id)
    }
}

/// 到店台账服务
pub struct VisitLedgerService<SR, D>
where
    SR: VehicleStatsRepositoryTrait,
    D: VehicleDirectory + ?Sized,
{
    stats_repo: Arc<SR>,
    directory: Arc<D>,
    cache: Arc<Cache>,
}

impl<SR, D> VisitLedgerService<SR, D>
where
    SR: VehicleStatsRepositoryTrait,
    D: VehicleDirectory + ?Sized,
{
    pub fn new(stats_repo: Arc<SR>, directory: Arc<D>, cache: Arc<Cache>) -> Self {
        Self {
            stats_repo,
            directory,
            cache,
        }
    }

    /// 记录一次到店
    ///
    /// 支持按车辆 ID 或车牌定位；车牌未登记时自动在车辆目录登记。
    /// 统计行不存在时由 upsert 语句在同一轮次创建，首次到店无需单独初始化
    #[instrument(skip(self, request))]
    pub async fn record_visit(&self, request: RecordVisitRequest) -> Result<VehicleStats> {
        let vehicle_id = match (request.vehicle_id, request.license_plate.as_deref()) {
            (Some(id), _) => id,
            (None, Some(plate)) => match self.directory.resolve(plate).await? {
                Some(id) => id,
                None => {
                    let id = self
                        .directory
                        .create(plate, &VehicleAttrs::default())
                        .await?;
                    info!(license_plate = %plate, vehicle_id = id, "新车牌已登记");
                    id
                }
            },
            (None, None) => {
                return Err(LoyaltyError::Validation(
                    "必须提供 vehicleId 或 licensePlate".to_string(),
                ));
            }
        };

        let stats = self.stats_repo.record_visit(vehicle_id, Utc::now()).await?;

        metrics::record_visit_recorded();
        self.invalidate_stats_cache(vehicle_id).await;

        info!(
            vehicle_id,
            total_visits = stats.total_visits,
            current_visit_count = stats.current_visit_count,
            visit_id = ?request.visit_id,
            "到店已记录"
        );

        Ok(stats)
    }

    /// 获取车辆统计
    pub async fn get_stats(&self, vehicle_ref: VehicleRef) -> Result<VehicleStats> {
        let vehicle_id = self.resolve(&vehicle_ref).await?;

        self.stats_repo
            .get_stats(vehicle_id)
            .await?
            .ok_or(LoyaltyError::VehicleStatsNotFound(vehicle_id))
    }

    /// 清零当前连续到店计数
    ///
    /// 没有统计行说明上游逻辑有误（从未到店却要求清零），报 NotFound
    #[instrument(skip(self))]
    pub async fn reset_visit_count(&self, vehicle_id: i64) -> Result<()> {
        let affected = self.stats_repo.reset_visit_count(vehicle_id).await?;
        if affected == 0 {
            return Err(LoyaltyError::VehicleStatsNotFound(vehicle_id));
        }

        self.invalidate_stats_cache(vehicle_id).await;

        info!(vehicle_id, "连续到店计数已清零");

        Ok(())
    }

    /// 当前连续到店计数（发放评估用的只读口径）
    ///
    /// 统计行不存在视为 0，不报错
    pub async fn eligibility_count(&self, vehicle_id: i64) -> Result<i32> {
        Ok(self
            .stats_repo
            .get_stats(vehicle_id)
            .await?
            .map(|s| s.current_visit_count)
            .unwrap_or(0))
    }

    /// 显式初始化零值统计行，幂等
    ///
    /// 行已存在时原样返回，不修改任何计数
    #[instrument(skip(self))]
    pub async fn initialize(&self, vehicle_id: i64) -> Result<VehicleStats> {
        self.stats_repo.initialize(vehicle_id).await
    }

    /// 人工修正计数器
    ///
    /// 修正后的整行必须继续满足两条不变量：
    /// current_visit_count ≤ total_visits，total_offers_used ≤ total_offers_earned
    #[instrument(skip(self, request))]
    pub async fn manual_adjust(
        &self,
        vehicle_id: i64,
        request: AdjustStatsRequest,
    ) -> Result<VehicleStats> {
        request.validate()?;

        if request.is_empty() {
            return Err(LoyaltyError::Validation(
                "至少提供一个待修正的计数字段".to_string(),
            ));
        }

        let existing = self
            .stats_repo
            .get_stats(vehicle_id)
            .await?
            .ok_or(LoyaltyError::VehicleStatsNotFound(vehicle_id))?;

        let total_visits = request.total_visits.unwrap_or(existing.total_visits);
        let current = request
            .current_visit_count
            .unwrap_or(existing.current_visit_count);
        let earned = request
            .total_offers_earned
            .unwrap_or(existing.total_offers_earned);
        let used = request.total_offers_used.unwrap_or(existing.total_offers_used);

        if current > total_visits {
            return Err(LoyaltyError::Validation(format!(
                "当前连续到店数 {} 不能超过累计到店数 {}",
                current, total_visits
            )));
        }
        if used > earned {
            return Err(LoyaltyError::Validation(format!(
                "累计使用优惠数 {} 不能超过累计获得优惠数 {}",
                used, earned
            )));
        }

        let affected = self
            .stats_repo
            .adjust(
                vehicle_id,
                request.total_visits,
                request.current_visit_count,
                request.total_offers_earned,
                request.total_offers_used,
            )
            .await?;
        if affected == 0 {
            return Err(LoyaltyError::VehicleStatsNotFound(vehicle_id));
        }

        self.invalidate_stats_cache(vehicle_id).await;

        info!(vehicle_id, "车辆统计已人工修正");

        self.stats_repo
            .get_stats(vehicle_id)
            .await?
            .ok_or(LoyaltyError::VehicleStatsNotFound(vehicle_id))
    }

    /// 按车辆定位参数解析车辆 ID
    ///
    /// 读路径不做自动登记，未知车牌直接报 NotFound
    async fn resolve(&self, vehicle_ref: &VehicleRef) -> Result<i64> {
        if let Some(id) = vehicle_ref.vehicle_id {
            return Ok(id);
        }

        let plate = vehicle_ref.license_plate.as_deref().ok_or_else(|| {
            LoyaltyError::Validation("必须提供 vehicleId 或 licensePlate".to_string())
        })?;

        self.directory
            .resolve(plate)
            .await?
            .ok_or_else(|| LoyaltyError::VehicleNotFound(plate.to_string()))
    }

    /// 使车辆统计缓存失效，失败仅记录警告
    async fn invalidate_stats_cache(&self, vehicle_id: i64) {
        let key = cache_keys::vehicle_stats(vehicle_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "缓存失效失败");
        }
    }
}
