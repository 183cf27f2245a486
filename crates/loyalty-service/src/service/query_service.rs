//! 忠诚度查询服务
//!
//! 提供优惠定义、车辆统计与发放记录的只读查询，采用缓存优先策略。
//!
//! ## 缓存策略
//!
//! - 优惠详情: TTL 10 分钟（目录变更时由写路径失效）
//! - 车辆统计: TTL 1 分钟（到店/核销时由写路径失效）
//! - 车辆 active 优惠: TTL 30 秒（发放/核销/过期时由写路径失效）
//!
//! 列表查询不缓存，始终反映最新状态。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tracing::{instrument, warn};

use loyalty_shared::cache::Cache;

use crate::directory::VehicleDirectory;
use crate::error::{LoyaltyError, Result};
use crate::models::{Offer, VehicleOffer, VehicleStats};
use crate::repository::{
    OfferRepositoryTrait, VehicleOfferRepositoryTrait, VehicleStatsRepositoryTrait,
};
use crate::service::dto::{PageResponse, PaginationParams, VehicleOfferFilter, VehicleRef};

/// 缓存 TTL 常量（秒）
mod cache_ttl {
    pub const OFFER_DETAIL: u64 = 600; // 10 min
    pub const VEHICLE_STATS: u64 = 60; // 1 min
    pub const ACTIVE_OFFERS: u64 = 30; // 30 s
}

/// 缓存键生成
mod cache_keys {
    pub fn offer_detail(offer_id: i64) -> String {
        format!("offer:detail:{}", offer_id)
    }

    pub fn vehicle_stats(vehicle_id: i64) -> String {
        format!("vehicle:stats:{}", vehicle_id)
    }

    pub fn vehicle_active_offers(vehicle_id: i64) -> String {
        format!("vehicle:offers:active:{}", vehicle_id)
    }
}

/// 忠诚度查询服务
pub struct LoyaltyQueryService<OR, SR, VOR, D>
where
    OR: OfferRepositoryTrait,
    SR: VehicleStatsRepositoryTrait,
    VOR: VehicleOfferRepositoryTrait,
    D: VehicleDirectory + ?Sized,
{
    offer_repo: Arc<OR>,
    stats_repo: Arc<SR>,
    vehicle_offer_repo: Arc<VOR>,
    directory: Arc<D>,
    cache: Arc<Cache>,
}

impl<OR, SR, VOR, D> LoyaltyQueryService<OR, SR, VOR, D>
where
    OR: OfferRepositoryTrait,
    SR: VehicleStatsRepositoryTrait,
    VOR: VehicleOfferRepositoryTrait,
    D: VehicleDirectory + ?Sized,
{
    pub fn new(
        offer_repo: Arc<OR>,
        stats_repo: Arc<SR>,
        vehicle_offer_repo: Arc<VOR>,
        directory: Arc<D>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            offer_repo,
            stats_repo,
            vehicle_offer_repo,
            directory,
            cache,
        }
    }

    /// 带缓存的数据获取辅助方法
    ///
    /// 缓存读写失败都不影响主流程，降级为直接读数据库
    async fn get_cached_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.cache.get::<T>(key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "缓存读取失败，回退数据库");
            }
        }

        let data = fetch().await?;

        if let Err(e) = self.cache.set(key, &data, ttl).await {
            warn!(key = %key, error = %e, "缓存写入失败");
        }

        Ok(data)
    }

    /// 获取优惠详情
    ///
    /// 缓存键: offer:detail:{id}, TTL: 10min
    #[instrument(skip(self))]
    pub async fn get_offer(&self, offer_id: i64) -> Result<Offer> {
        let cache_key = cache_keys::offer_detail(offer_id);

        self.get_cached_or_fetch(
            &cache_key,
            Duration::from_secs(cache_ttl::OFFER_DETAIL),
            || async {
                self.offer_repo
                    .get_offer(offer_id)
                    .await?
                    .ok_or(LoyaltyError::OfferNotFound(offer_id))
            },
        )
        .await
    }

    /// 获取车辆统计
    ///
    /// 缓存键: vehicle:stats:{vehicle_id}, TTL: 1min
    #[instrument(skip(self, vehicle_ref))]
    pub async fn get_stats(&self, vehicle_ref: VehicleRef) -> Result<VehicleStats> {
        let vehicle_id = self.resolve(&vehicle_ref).await?;
        let cache_key = cache_keys::vehicle_stats(vehicle_id);

        self.get_cached_or_fetch(
            &cache_key,
            Duration::from_secs(cache_ttl::VEHICLE_STATS),
            || async {
                self.stats_repo
                    .get_stats(vehicle_id)
                    .await?
                    .ok_or(LoyaltyError::VehicleStatsNotFound(vehicle_id))
            },
        )
        .await
    }

    /// 获取单条发放记录
    ///
    /// 生命周期状态敏感，不走缓存
    pub async fn get_vehicle_offer(&self, vehicle_offer_id: i64) -> Result<VehicleOffer> {
        self.vehicle_offer_repo
            .get_vehicle_offer(vehicle_offer_id)
            .await?
            .ok_or(LoyaltyError::VehicleOfferNotFound(vehicle_offer_id))
    }

    /// 车辆当前持有的全部 active 优惠
    ///
    /// 缓存键: vehicle:offers:active:{vehicle_id}, TTL: 30s
    #[instrument(skip(self, vehicle_ref))]
    pub async fn active_offers(&self, vehicle_ref: VehicleRef) -> Result<Vec<VehicleOffer>> {
        let vehicle_id = self.resolve(&vehicle_ref).await?;
        let cache_key = cache_keys::vehicle_active_offers(vehicle_id);

        self.get_cached_or_fetch(
            &cache_key,
            Duration::from_secs(cache_ttl::ACTIVE_OFFERS),
            || async {
                self.vehicle_offer_repo
                    .list_active_for_vehicle(vehicle_id)
                    .await
            },
        )
        .await
    }

    /// 分页查询发放记录
    ///
    /// 按车牌过滤时先解析车辆 ID，未登记车牌返回空结果（非错误）
    #[instrument(skip(self, filter, pagination))]
    pub async fn list_vehicle_offers(
        &self,
        filter: VehicleOfferFilter,
        pagination: PaginationParams,
    ) -> Result<PageResponse<VehicleOffer>> {
        let limit = pagination.limit();

        let vehicle_id = match (filter.vehicle_id, filter.license_plate.as_deref()) {
            (Some(id), _) => Some(id),
            (None, Some(plate)) => match self.directory.resolve(plate).await? {
                Some(id) => Some(id),
                None => {
                    return Ok(PageResponse::new(Vec::new(), 0, pagination.page, limit));
                }
            },
            (None, None) => None,
        };

        let (items, total) = self
            .vehicle_offer_repo
            .list_vehicle_offers(
                vehicle_id,
                filter.offer_id,
                filter.status,
                filter.issued_from,
                filter.issued_to,
                limit,
                pagination.offset(),
            )
            .await?;

        Ok(PageResponse::new(items, total, pagination.page, limit))
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockVehicleDirectory;
    use crate::models::VehicleOfferStatus;
    use crate::repository::{
        MockOfferRepositoryTrait, MockVehicleOfferRepositoryTrait,
        MockVehicleStatsRepositoryTrait,
    };
    use chrono::Utc;
    use loyalty_shared::config::RedisConfig;

    type TestQueryService = LoyaltyQueryService<
        MockOfferRepositoryTrait,
        MockVehicleStatsRepositoryTrait,
        MockVehicleOfferRepositoryTrait,
        MockVehicleDirectory,
    >;

    fn test_cache() -> Arc<Cache> {
        Arc::new(Cache::new(&RedisConfig::default()).unwrap())
    }

    fn sample_vehicle_offer(id: i64, vehicle_id: i64) -> VehicleOffer {
        VehicleOffer {
            id,
            vehicle_id,
            offer_id: 1,
            earned_on_visit_id: None,
            issued_date: Utc::now(),
            status: VehicleOfferStatus::Active,
            used_date: None,
            used_on_visit_id: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(
        offer_repo: MockOfferRepositoryTrait,
        stats_repo: MockVehicleStatsRepositoryTrait,
        vehicle_offer_repo: MockVehicleOfferRepositoryTrait,
        directory: MockVehicleDirectory,
    ) -> TestQueryService {
        LoyaltyQueryService::new(
            Arc::new(offer_repo),
            Arc::new(stats_repo),
            Arc::new(vehicle_offer_repo),
            Arc::new(directory),
            test_cache(),
        )
    }

    #[tokio::test]
    async fn test_get_vehicle_offer_not_found() {
        let mut vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        vehicle_offer_repo
            .expect_get_vehicle_offer()
            .returning(|_| Ok(None));

        let query = service(
            MockOfferRepositoryTrait::new(),
            MockVehicleStatsRepositoryTrait::new(),
            vehicle_offer_repo,
            MockVehicleDirectory::new(),
        );

        let err = query.get_vehicle_offer(404).await.unwrap_err();
        assert_eq!(err.error_code(), "VEHICLE_OFFER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_by_unknown_plate_returns_empty_page() {
        let mut directory = MockVehicleDirectory::new();
        directory.expect_resolve().returning(|_| Ok(None));

        let query = service(
            MockOfferRepositoryTrait::new(),
            MockVehicleStatsRepositoryTrait::new(),
            MockVehicleOfferRepositoryTrait::new(),
            directory,
        );

        let page = query
            .list_vehicle_offers(
                VehicleOfferFilter {
                    license_plate: Some("KXX 000Z".to_string()),
                    ..Default::default()
                },
                PaginationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_prefers_vehicle_id_over_plate() {
        let mut vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        vehicle_offer_repo
            .expect_list_vehicle_offers()
            .withf(|vehicle_id, _, _, _, _, _, _| *vehicle_id == Some(9))
            .returning(|_, _, _, _, _, _, _| Ok((vec![sample_vehicle_offer(1, 9)], 1)));

        // 提供了 vehicle_id 时不应触发车牌解析
        let query = service(
            MockOfferRepositoryTrait::new(),
            MockVehicleStatsRepositoryTrait::new(),
            vehicle_offer_repo,
            MockVehicleDirectory::new(),
        );

        let page = query
            .list_vehicle_offers(
                VehicleOfferFilter {
                    vehicle_id: Some(9),
                    license_plate: Some("KDA 123X".to_string()),
                    ..Default::default()
                },
                PaginationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].vehicle_id, 9);
    }
}
