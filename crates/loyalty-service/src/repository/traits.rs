//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    DiscountType, Offer, VehicleOffer, VehicleOfferStatus, VehicleStats,
    offer::{NewOffer, OfferPatch},
};

/// 优惠定义仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OfferRepositoryTrait: Send + Sync {
    async fn get_offer(&self, id: i64) -> Result<Option<Offer>>;
    async fn name_exists(&self, name: &str, exclude_id: Option<i64>) -> Result<bool>;
    async fn create_offer(&self, offer: &NewOffer) -> Result<i64>;
    async fn update_offer(&self, id: i64, patch: &OfferPatch) -> Result<u64>;
    async fn delete_offer(&self, id: i64) -> Result<u64>;
    /// 可参与发放评估的优惠，按 visit_threshold 升序
    async fn list_issuable(&self, as_of: NaiveDate) -> Result<Vec<Offer>>;
    #[allow(clippy::too_many_arguments)]
    async fn list_offers(
        &self,
        is_active: Option<bool>,
        discount_type: Option<DiscountType>,
        min_threshold: Option<i32>,
        max_threshold: Option<i32>,
        name_keyword: Option<String>,
        valid_on: Option<NaiveDate>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Offer>, i64)>;
    async fn bulk_set_active(&self, ids: &[i64], is_active: bool) -> Result<u64>;
}

/// 车辆访问统计仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleStatsRepositoryTrait: Send + Sync {
    async fn get_stats(&self, vehicle_id: i64) -> Result<Option<VehicleStats>>;
    /// 单语句原子累加到店计数，行不存在时创建
    async fn record_visit(
        &self,
        vehicle_id: i64,
        visited_at: DateTime<Utc>,
    ) -> Result<VehicleStats>;
    /// 返回受影响行数，0 表示统计行不存在
    async fn reset_visit_count(&self, vehicle_id: i64) -> Result<u64>;
    async fn increment_offers_earned(&self, vehicle_id: i64) -> Result<()>;
    async fn increment_offers_used(&self, vehicle_id: i64) -> Result<()>;
    /// 幂等创建零值统计行，返回当前行
    async fn initialize(&self, vehicle_id: i64) -> Result<VehicleStats>;
    /// 部分字段人工修正，返回受影响行数
    async fn adjust(
        &self,
        vehicle_id: i64,
        total_visits: Option<i32>,
        current_visit_count: Option<i32>,
        total_offers_earned: Option<i32>,
        total_offers_used: Option<i32>,
    ) -> Result<u64>;
}

/// 车辆优惠仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleOfferRepositoryTrait: Send + Sync {
    async fn get_vehicle_offer(&self, id: i64) -> Result<Option<VehicleOffer>>;
    async fn has_active_offer(&self, vehicle_id: i64, offer_id: i64) -> Result<bool>;
    async fn list_active_for_vehicle(&self, vehicle_id: i64) -> Result<Vec<VehicleOffer>>;
    /// 该优惠定义名下已发放的实例总数（删除保护检查用）
    async fn count_for_offer(&self, offer_id: i64) -> Result<i64>;
    #[allow(clippy::too_many_arguments)]
    async fn list_vehicle_offers(
        &self,
        vehicle_id: Option<i64>,
        offer_id: Option<i64>,
        status: Option<VehicleOfferStatus>,
        issued_from: Option<DateTime<Utc>>,
        issued_to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<VehicleOffer>, i64)>;
    /// 批量过期指定 ID，仅 active 行受影响，返回受影响行数
    async fn bulk_expire(&self, ids: &[i64], notes: Option<String>) -> Result<u64>;
    async fn delete_vehicle_offer(&self, id: i64) -> Result<u64>;
    /// 扫描并过期一批已超出有效期的 active 记录，返回本批过期数
    async fn expire_stale_batch(&self, as_of: NaiveDate, batch_size: i64) -> Result<u64>;
}
