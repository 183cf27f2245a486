//! 优惠发放引擎
//!
//! 车辆、优惠定义与生命周期状态三者的绑定点，负责发放、核销与过期。
//!
//! ## 并发纪律
//!
//! - 同一车辆同一优惠最多一条 active 记录由部分唯一索引保证，
//!   应用层的 `has_active_offer` 检查只是提前退出的优化
//! - 核销与过期都是条件更新（`WHERE status = 'active'`），两个并发
//!   操作同一记录时只有一个生效，落败方观察到 0 行受影响并报状态错误
//! - 跨实体副作用（发放后累加获得计数、核销后累加使用计数并清零连续
//!   计数）在单个本地事务内按序执行；计数器是尽力而为的遥测口径，
//!   不是授权门槛

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use validator::Validate;

use loyalty_shared::cache::Cache;
use loyalty_shared::observability::metrics;

use crate::directory::VehicleDirectory;
use crate::error::{LoyaltyError, Result};
use crate::models::{Offer, VehicleOffer};
use crate::repository::{OfferRepository, VehicleOfferRepository, VehicleStatsRepository};
use crate::service::dto::{BulkExpireRequest, IssueOfferRequest, MarkUsedRequest, VehicleRef};

/// 缓存键生成
mod cache_keys {
    pub fn vehicle_stats(vehicle_id: i64) -> String {
        format!("vehicle:stats:{}", vehicle_id)
    }

    pub fn vehicle_active_offers(vehicle_id: i64) -> String {
        format!("vehicle:offers:active:{}", vehicle_id)
    }
}

/// 优惠发放引擎
///
/// 发放与核销涉及跨表写入，直接持有具体仓储与连接池以便组织事务
pub struct LoyaltyEngineService {
    offer_repo: Arc<OfferRepository>,
    vehicle_offer_repo: Arc<VehicleOfferRepository>,
    stats_repo: Arc<VehicleStatsRepository>,
    directory: Arc<dyn VehicleDirectory>,
    cache: Arc<Cache>,
    pool: PgPool,
}

impl LoyaltyEngineService {
    pub fn new(
        offer_repo: Arc<OfferRepository>,
        vehicle_offer_repo: Arc<VehicleOfferRepository>,
        stats_repo: Arc<VehicleStatsRepository>,
        directory: Arc<dyn VehicleDirectory>,
        cache: Arc<Cache>,
        pool: PgPool,
    ) -> Self {
        Self {
            offer_repo,
            vehicle_offer_repo,
            stats_repo,
            directory,
            cache,
            pool,
        }
    }

    /// 到店后评估并发放符合条件的优惠
    ///
    /// 按门槛从低到高遍历当日可发放的优惠，连续到店数达到门槛且
    /// 车辆尚未持有该优惠的 active 实例时发放一条。重复发放尝试
    /// 静默跳过（no-op），不报错。返回本次新发放的全部实例
    #[instrument(skip(self), fields(vehicle_id, visit_id = ?visit_id))]
    pub async fn evaluate_and_issue(
        &self,
        vehicle_id: i64,
        visit_id: Option<i64>,
    ) -> Result<Vec<VehicleOffer>> {
        let current_count = self
            .stats_repo
            .get_stats(vehicle_id)
            .await?
            .map(|stats| stats.current_visit_count)
            .unwrap_or(0);

        if current_count <= 0 {
            return Ok(Vec::new());
        }

        let today = Utc::now().date_naive();
        let candidates = self.offer_repo.list_issuable(today).await?;

        let mut issued = Vec::new();
        for offer in candidates {
            if current_count < offer.visit_threshold {
                // 列表按门槛升序，后面的门槛只会更高
                break;
            }

            // 提前退出优化；真正的防重由部分唯一索引保证
            if self
                .vehicle_offer_repo
                .has_active_offer(vehicle_id, offer.id)
                .await?
            {
                continue;
            }

            if let Some(vehicle_offer) = self.issue_in_tx(vehicle_id, &offer, visit_id).await? {
                metrics::record_offer_issued(offer.id, "auto");
                info!(
                    vehicle_id,
                    offer_id = offer.id,
                    vehicle_offer_id = vehicle_offer.id,
                    visit_threshold = offer.visit_threshold,
                    current_visit_count = current_count,
                    "连续到店达到门槛，优惠已发放"
                );
                issued.push(vehicle_offer);
            }
        }

        if !issued.is_empty() {
            self.invalidate_vehicle_cache(vehicle_id).await;
        }

        Ok(issued)
    }

    /// 人工发放优惠
    ///
    /// 优惠必须存在、启用且当日处于有效期窗口内；车辆已持有该优惠的
    /// active 实例时报冲突（区别于自动发放的静默跳过）
    #[instrument(skip(self, request), fields(offer_id = request.offer_id))]
    pub async fn issue_offer(&self, request: IssueOfferRequest) -> Result<VehicleOffer> {
        request.validate()?;

        let vehicle_id = self.resolve(&request.vehicle_ref()).await?;

        let offer = self
            .offer_repo
            .get_offer(request.offer_id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(request.offer_id))?;

        let today = Utc::now().date_naive();
        if !offer.is_active {
            return Err(LoyaltyError::OfferInactive(offer.id));
        }
        if !offer.is_valid_on(today) {
            return Err(LoyaltyError::OfferOutsideValidity(offer.id));
        }

        if self
            .vehicle_offer_repo
            .has_active_offer(vehicle_id, offer.id)
            .await?
        {
            return Err(LoyaltyError::DuplicateActiveOffer {
                vehicle_id,
                offer_id: offer.id,
            });
        }

        let mut tx = self.pool.begin().await?;
        // 并发间隙里被抢先发放时由唯一约束兜底，映射为冲突错误
        let vehicle_offer = VehicleOfferRepository::insert_active_in_tx(
            &mut tx,
            vehicle_id,
            offer.id,
            request.visit_id,
            Utc::now(),
            request.notes.as_deref(),
        )
        .await?;
        VehicleStatsRepository::increment_offers_earned_in_tx(&mut tx, vehicle_id).await?;
        tx.commit().await?;

        metrics::record_offer_issued(offer.id, "manual");
        self.invalidate_vehicle_cache(vehicle_id).await;

        info!(
            vehicle_id,
            offer_id = offer.id,
            vehicle_offer_id = vehicle_offer.id,
            "优惠已人工发放"
        );

        Ok(vehicle_offer)
    }

    /// 核销优惠：active → used
    ///
    /// 同一事务内累加使用计数并清零连续到店计数。核销总是清零全局
    /// 连续计数，即使车辆还持有其他 active 优惠
    #[instrument(skip(self, request), fields(used_on_visit_id = request.used_on_visit_id))]
    pub async fn mark_used(
        &self,
        vehicle_offer_id: i64,
        request: MarkUsedRequest,
    ) -> Result<VehicleOffer> {
        request.validate()?;

        let existing = self
            .vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))?;

        // 类型化状态机先拒绝终态上的核销；并发权威仍是条件更新
        if let Err(denied) = existing
            .lifecycle()
            .redeem(Utc::now(), request.used_on_visit_id)
        {
            return Err(LoyaltyError::InvalidOfferState {
                vehicle_offer_id,
                current_status: denied.from.as_str().to_string(),
                attempted: "mark_used".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        let affected = VehicleOfferRepository::mark_used_in_tx(
            &mut tx,
            vehicle_offer_id,
            Utc::now(),
            request.used_on_visit_id,
            request.notes.as_deref(),
        )
        .await?;

        if affected == 0 {
            tx.rollback().await?;
            return Err(self.invalid_state_error(vehicle_offer_id, "mark_used").await?);
        }

        VehicleStatsRepository::increment_offers_used_in_tx(&mut tx, existing.vehicle_id).await?;
        VehicleStatsRepository::reset_visit_count_in_tx(&mut tx, existing.vehicle_id).await?;
        tx.commit().await?;

        metrics::record_offer_redeemed(existing.offer_id);
        self.invalidate_vehicle_cache(existing.vehicle_id).await;

        info!(
            vehicle_offer_id,
            vehicle_id = existing.vehicle_id,
            offer_id = existing.offer_id,
            used_on_visit_id = request.used_on_visit_id,
            "优惠已核销，连续到店计数清零"
        );

        self.vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))
    }

    /// 人工过期优惠：active → expired
    #[instrument(skip(self, notes))]
    pub async fn mark_expired(
        &self,
        vehicle_offer_id: i64,
        notes: Option<String>,
    ) -> Result<VehicleOffer> {
        let existing = self
            .vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))?;

        if let Err(denied) = existing.lifecycle().expire(notes.clone()) {
            return Err(LoyaltyError::InvalidOfferState {
                vehicle_offer_id,
                current_status: denied.from.as_str().to_string(),
                attempted: "mark_expired".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        let affected =
            VehicleOfferRepository::mark_expired_in_tx(&mut tx, vehicle_offer_id, notes.as_deref())
                .await?;

        if affected == 0 {
            tx.rollback().await?;
            return Err(self
                .invalid_state_error(vehicle_offer_id, "mark_expired")
                .await?);
        }

        tx.commit().await?;

        metrics::record_offers_expired(1, "manual");
        self.invalidate_vehicle_cache(existing.vehicle_id).await;

        info!(
            vehicle_offer_id,
            vehicle_id = existing.vehicle_id,
            offer_id = existing.offer_id,
            "优惠已人工过期"
        );

        self.vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))
    }

    /// 过期清扫：批量过期有效期已过的 active 优惠，返回过期总数
    ///
    /// 按批扫描直到无候选行。幂等：第一轮已把行移出 active，
    /// 紧接着的第二次调用不会再过期任何行
    #[instrument(skip(self))]
    pub async fn expire_stale_offers(&self, as_of: NaiveDate, batch_size: i64) -> Result<u64> {
        let mut total = 0u64;

        loop {
            let expired = self
                .vehicle_offer_repo
                .expire_stale_batch(as_of, batch_size)
                .await?;
            total += expired;

            if expired < batch_size as u64 {
                break;
            }
        }

        if total > 0 {
            info!(as_of = %as_of, total, "过期清扫完成");
        }

        Ok(total)
    }

    /// 批量过期指定发放记录，返回受影响数量
    ///
    /// 未知 ID 与已处于终态的记录静默跳过
    #[instrument(skip(self, request), fields(count = request.vehicle_offer_ids.len()))]
    pub async fn bulk_expire(&self, request: BulkExpireRequest) -> Result<u64> {
        request.validate()?;

        let affected = self
            .vehicle_offer_repo
            .bulk_expire(&request.vehicle_offer_ids, request.notes)
            .await?;

        if affected > 0 {
            metrics::record_offers_expired(affected, "bulk");
        }

        info!(
            requested = request.vehicle_offer_ids.len(),
            affected, "批量过期完成"
        );

        Ok(affected)
    }

    /// 检查车辆是否持有某优惠的 active 实例
    pub async fn has_active_offer(&self, vehicle_id: i64, offer_id: i64) -> Result<bool> {
        self.vehicle_offer_repo
            .has_active_offer(vehicle_id, offer_id)
            .await
    }

    /// 列出车辆当前持有的全部 active 优惠
    pub async fn check_active(&self, vehicle_ref: VehicleRef) -> Result<Vec<VehicleOffer>> {
        let vehicle_id = self.resolve(&vehicle_ref).await?;
        self.vehicle_offer_repo
            .list_active_for_vehicle(vehicle_id)
            .await
    }

    /// 删除发放记录（运维清理用）
    ///
    /// 任何状态均可删除；计数器不回退
    #[instrument(skip(self))]
    pub async fn delete(&self, vehicle_offer_id: i64) -> Result<()> {
        let existing = self
            .vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))?;

        let affected = self
            .vehicle_offer_repo
            .delete_vehicle_offer(vehicle_offer_id)
            .await?;
        if affected == 0 {
            return Err(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id));
        }

        self.invalidate_vehicle_cache(existing.vehicle_id).await;

        info!(vehicle_offer_id, vehicle_id = existing.vehicle_id, "发放记录已删除");

        Ok(())
    }

    // ==================== 私有方法 ====================

    /// 单条发放事务：插入 active 实例并累加获得计数
    ///
    /// 唯一索引仲裁到已有 active 实例时整体回滚并返回 None
    async fn issue_in_tx(
        &self,
        vehicle_id: i64,
        offer: &Offer,
        visit_id: Option<i64>,
    ) -> Result<Option<VehicleOffer>> {
        let mut tx = self.pool.begin().await?;

        let inserted = VehicleOfferRepository::insert_active_if_absent_in_tx(
            &mut tx,
            vehicle_id,
            offer.id,
            visit_id,
            Utc::now(),
            None,
        )
        .await?;

        match inserted {
            Some(vehicle_offer) => {
                VehicleStatsRepository::increment_offers_earned_in_tx(&mut tx, vehicle_id).await?;
                tx.commit().await?;
                Ok(Some(vehicle_offer))
            }
            None => {
                // 并发发放落败，既有 active 实例仍然有效
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    /// 条件更新 0 行受影响时构造对应错误
    ///
    /// 记录已被并发删除 → NotFound；否则带当前状态报非法转移
    async fn invalid_state_error(
        &self,
        vehicle_offer_id: i64,
        attempted: &str,
    ) -> Result<LoyaltyError> {
        let current = self
            .vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?;

        Ok(match current {
            Some(row) => LoyaltyError::InvalidOfferState {
                vehicle_offer_id,
                current_status: row.status.as_str().to_string(),
                attempted: attempted.to_string(),
            },
            None => LoyaltyError::VehicleOfferNotFound(vehicle_offer_id),
        })
    }

    /// 按车辆定位参数解析车辆 ID（不自动登记）
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

    /// 使车辆相关缓存失效，失败仅记录警告
    async fn invalidate_vehicle_cache(&self, vehicle_id: i64) {
        let keys = [
            cache_keys::vehicle_stats(vehicle_id),
            cache_keys::vehicle_active_offers(vehicle_id),
        ];

        for key in keys {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "缓存失效失败");
            }
        }
    }
}
