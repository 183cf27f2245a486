//! 优惠目录服务
//!
//! 管理优惠定义的完整生命周期：创建、更新、删除、查询与批量启停。
//! 折扣类型与折扣数值的配对规则在这一层强制执行：
//! - percentage / fixed_amount：discount_value 必填且大于 0
//! - free_wash：discount_value 强制归一为 0

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument, warn};
use validator::Validate;

use loyalty_shared::cache::Cache;

use crate::error::{LoyaltyError, Result};
use crate::models::{DiscountType, Offer};
use crate::repository::{OfferRepositoryTrait, VehicleOfferRepositoryTrait};
use crate::service::dto::{
    BulkSetActiveRequest, CreateOfferRequest, OfferFilter, PageResponse, PaginationParams,
    UpdateOfferRequest,
};

/// 缓存键生成
mod cache_keys {
    pub fn offer_detail(offer_id: i64) -> String {
        format!("offer:detail:{}", offer_id)
    }
}

/// 优惠目录服务
///
/// 持有优惠仓储做数据访问，发放记录仓储仅用于删除保护检查
pub struct OfferCatalogService<OR, VOR>
where
    OR: OfferRepositoryTrait,
    VOR: VehicleOfferRepositoryTrait,
{
    offer_repo: Arc<OR>,
    vehicle_offer_repo: Arc<VOR>,
    cache: Arc<Cache>,
}

impl<OR, VOR> OfferCatalogService<OR, VOR>
where
    OR: OfferRepositoryTrait,
    VOR: VehicleOfferRepositoryTrait,
{
    pub fn new(offer_repo: Arc<OR>, vehicle_offer_repo: Arc<VOR>, cache: Arc<Cache>) -> Self {
        Self {
            offer_repo,
            vehicle_offer_repo,
            cache,
        }
    }

    /// 创建优惠定义
    ///
    /// 校验名称唯一、门槛为正、折扣配对规则与有效期窗口，
    /// is_active 省略时默认启用
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateOfferRequest) -> Result<Offer> {
        request.validate()?;

        let discount_value =
            normalized_discount_value(request.discount_type, request.discount_value)?;
        validate_validity_window(request.valid_from, request.valid_until)?;

        if self.offer_repo.name_exists(&request.name, None).await? {
            return Err(LoyaltyError::DuplicateOfferName(request.name));
        }

        let new_offer = request.into_new_offer(discount_value);
        let id = self.offer_repo.create_offer(&new_offer).await?;

        let offer = self
            .offer_repo
            .get_offer(id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(id))?;

        info!(
            offer_id = id,
            name = %offer.name,
            visit_threshold = offer.visit_threshold,
            "优惠定义已创建"
        );

        Ok(offer)
    }

    /// 部分更新优惠定义
    ///
    /// 先合并出更新后的完整定义再整体校验，避免补丁把定义改出非法组合
    #[instrument(skip(self, request))]
    pub async fn update(&self, id: i64, request: UpdateOfferRequest) -> Result<Offer> {
        request.validate()?;

        let existing = self
            .offer_repo
            .get_offer(id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(id))?;

        let mut patch = request.into_patch();
        let merged = existing.merged_with(&patch);

        let discount_value =
            normalized_discount_value(merged.discount_type, Some(merged.discount_value))?;
        validate_validity_window(merged.valid_from, merged.valid_until)?;

        // 折扣类型变为 free_wash 时把数值同步归零
        if patch.discount_type.is_some() || patch.discount_value.is_some() {
            patch.discount_value = Some(discount_value);
        }

        if let Some(name) = &patch.name {
            if name != &existing.name && self.offer_repo.name_exists(name, Some(id)).await? {
                return Err(LoyaltyError::DuplicateOfferName(name.clone()));
            }
        }

        let affected = self.offer_repo.update_offer(id, &patch).await?;
        if affected == 0 {
            return Err(LoyaltyError::OfferNotFound(id));
        }

        self.invalidate_offer_cache(id).await;

        let offer = self
            .offer_repo
            .get_offer(id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(id))?;

        info!(offer_id = id, "优惠定义已更新");

        Ok(offer)
    }

    /// 删除优惠定义
    ///
    /// 仅允许删除从未发放过的定义，已发放的只能停用
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let issued = self.vehicle_offer_repo.count_for_offer(id).await?;
        if issued > 0 {
            return Err(LoyaltyError::OfferInUse(id));
        }

        let affected = self.offer_repo.delete_offer(id).await?;
        if affected == 0 {
            return Err(LoyaltyError::OfferNotFound(id));
        }

        self.invalidate_offer_cache(id).await;

        info!(offer_id = id, "优惠定义已删除");

        Ok(())
    }

    /// 获取单个优惠定义
    pub async fn get(&self, id: i64) -> Result<Offer> {
        self.offer_repo
            .get_offer(id)
            .await?
            .ok_or(LoyaltyError::OfferNotFound(id))
    }

    /// 分页查询优惠定义
    #[instrument(skip(self, filter, pagination))]
    pub async fn list(
        &self,
        filter: OfferFilter,
        pagination: PaginationParams,
    ) -> Result<PageResponse<Offer>> {
        let limit = pagination.limit();
        let offset = pagination.offset();

        let (offers, total) = self
            .offer_repo
            .list_offers(
                filter.is_active,
                filter.discount_type,
                filter.min_threshold,
                filter.max_threshold,
                filter.name_keyword,
                filter.valid_on,
                limit,
                offset,
            )
            .await?;

        Ok(PageResponse::new(offers, total, pagination.page, limit))
    }

    /// 列出指定日期可参与发放评估的优惠，按门槛从低到高
    ///
    /// 发放引擎按这个顺序评估，保证"最容易获得的优惠先评"的确定性
    pub async fn list_active(&self, as_of: NaiveDate) -> Result<Vec<Offer>> {
        self.offer_repo.list_issuable(as_of).await
    }

    /// 批量启用或停用优惠，返回受影响数量
    ///
    /// 未知 ID 静默跳过，重复设置同一状态无副作用
    #[instrument(skip(self, request), fields(count = request.offer_ids.len(), is_active = request.is_active))]
    pub async fn bulk_set_active(&self, request: BulkSetActiveRequest) -> Result<u64> {
        request.validate()?;

        let affected = self
            .offer_repo
            .bulk_set_active(&request.offer_ids, request.is_active)
            .await?;

        for id in &request.offer_ids {
            self.invalidate_offer_cache(*id).await;
        }

        info!(
            requested = request.offer_ids.len(),
            affected, "批量调整优惠启用状态完成"
        );

        Ok(affected)
    }

    /// 使优惠详情缓存失效，失败仅记录警告
    async fn invalidate_offer_cache(&self, offer_id: i64) {
        let key = cache_keys::offer_detail(offer_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "缓存失效失败");
        }
    }
}

/// 按折扣类型归一化折扣数值
///
/// percentage / fixed_amount 必填且大于 0，free_wash 忽略入参固定为 0
fn normalized_discount_value(
    discount_type: DiscountType,
    discount_value: Option<f64>,
) -> Result<f64> {
    if !discount_type.requires_value() {
        return Ok(0.0);
    }

    match discount_value {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(LoyaltyError::Validation(format!(
            "折扣类型 {:?} 要求 discount_value 大于 0",
            discount_type
        ))),
    }
}

/// 校验有效期窗口
fn validate_validity_window(
    valid_from: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
) -> Result<()> {
    if let (Some(from), Some(until)) = (valid_from, valid_until) {
        if from > until {
            return Err(LoyaltyError::Validation(format!(
                "有效期窗口非法: valid_from={} 晚于 valid_until={}",
                from, until
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MockOfferRepositoryTrait, MockVehicleOfferRepositoryTrait};
    use chrono::Utc;
    use loyalty_shared::config::RedisConfig;

    fn test_cache() -> Arc<Cache> {
        Arc::new(Cache::new(&RedisConfig::default()).unwrap())
    }

    fn sample_offer(id: i64, name: &str) -> Offer {
        Offer {
            id,
            name: name.to_string(),
            description: None,
            visit_threshold: 5,
            discount_type: DiscountType::FreeWash,
            discount_value: 0.0,
            is_active: true,
            valid_from: None,
            valid_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn create_request(discount_type: DiscountType, discount_value: Option<f64>) -> CreateOfferRequest {
        CreateOfferRequest {
            name: "五次洗车免单".to_string(),
            description: None,
            visit_threshold: 5,
            discount_type,
            discount_value,
            is_active: None,
            valid_from: None,
            valid_until: None,
        }
    }

    #[test]
    fn test_discount_pairing_rule() {
        // percentage 要求正数值
        assert!(normalized_discount_value(DiscountType::Percentage, Some(0.0)).is_err());
        assert!(normalized_discount_value(DiscountType::Percentage, None).is_err());
        assert_eq!(
            normalized_discount_value(DiscountType::Percentage, Some(15.0)).unwrap(),
            15.0
        );

        // fixed_amount 同 percentage
        assert!(normalized_discount_value(DiscountType::FixedAmount, Some(-1.0)).is_err());
        assert_eq!(
            normalized_discount_value(DiscountType::FixedAmount, Some(200.0)).unwrap(),
            200.0
        );

        // free_wash 忽略数值固定为 0
        assert_eq!(
            normalized_discount_value(DiscountType::FreeWash, Some(99.0)).unwrap(),
            0.0
        );
        assert_eq!(
            normalized_discount_value(DiscountType::FreeWash, None).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_validity_window_rule() {
        let from = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let until = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        assert!(validate_validity_window(Some(from), Some(until)).is_err());
        assert!(validate_validity_window(Some(until), Some(from)).is_ok());
        assert!(validate_validity_window(None, Some(until)).is_ok());
        assert!(validate_validity_window(Some(from), None).is_ok());
    }

    #[tokio::test]
    async fn test_create_percentage_with_zero_value_rejected() {
        let offer_repo = MockOfferRepositoryTrait::new();
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let err = service
            .create(create_request(DiscountType::Percentage, Some(0.0)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_duplicate_name_rejected() {
        let mut offer_repo = MockOfferRepositoryTrait::new();
        offer_repo
            .expect_name_exists()
            .returning(|_, _| Ok(true));
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let err = service
            .create(create_request(DiscountType::FreeWash, None))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_OFFER_NAME");
    }

    #[tokio::test]
    async fn test_create_returns_persisted_offer_with_defaults() {
        let mut offer_repo = MockOfferRepositoryTrait::new();
        offer_repo.expect_name_exists().returning(|_, _| Ok(false));
        offer_repo.expect_create_offer().returning(|new_offer| {
            // is_active 省略时默认为 true，free_wash 数值归零
            assert!(new_offer.is_active);
            assert_eq!(new_offer.discount_value, 0.0);
            Ok(42)
        });
        offer_repo
            .expect_get_offer()
            .returning(|id| Ok(Some(sample_offer(id, "五次洗车免单"))));
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let offer = service
            .create(create_request(DiscountType::FreeWash, Some(15.0)))
            .await
            .unwrap();
        assert_eq!(offer.id, 42);
        assert!(offer.is_active);
    }

    #[tokio::test]
    async fn test_update_missing_offer_not_found() {
        let mut offer_repo = MockOfferRepositoryTrait::new();
        offer_repo.expect_get_offer().returning(|_| Ok(None));
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let err = service
            .update(999, UpdateOfferRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "OFFER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_update_merged_result_must_satisfy_pairing() {
        // 已有 free_wash 定义，仅把类型改为 percentage 而不给数值 → 合并结果非法
        let mut offer_repo = MockOfferRepositoryTrait::new();
        offer_repo
            .expect_get_offer()
            .returning(|id| Ok(Some(sample_offer(id, "五次洗车免单"))));
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let request = UpdateOfferRequest {
            discount_type: Some(DiscountType::Percentage),
            ..Default::default()
        };
        let err = service.update(1, request).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_delete_issued_offer_rejected() {
        let offer_repo = MockOfferRepositoryTrait::new();
        let mut vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        vehicle_offer_repo
            .expect_count_for_offer()
            .returning(|_| Ok(3));
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let err = service.delete(7).await.unwrap_err();
        assert_eq!(err.error_code(), "OFFER_IN_USE");
    }

    #[tokio::test]
    async fn test_bulk_set_active_skips_unknown_ids() {
        let mut offer_repo = MockOfferRepositoryTrait::new();
        offer_repo
            .expect_bulk_set_active()
            .returning(|ids, _| Ok(ids.len() as u64 - 1));
        let vehicle_offer_repo = MockVehicleOfferRepositoryTrait::new();
        let service = OfferCatalogService::new(
            Arc::new(offer_repo),
            Arc::new(vehicle_offer_repo),
            test_cache(),
        );

        let affected = service
            .bulk_set_active(BulkSetActiveRequest {
                offer_ids: vec![1, 2, 999],
                is_active: false,
            })
            .await
            .unwrap();
        assert_eq!(affected, 2);
    }
}
