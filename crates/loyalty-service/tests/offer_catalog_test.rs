//! OfferCatalogService 集成测试
//!
//! 使用真实 PostgreSQL 和 Redis 验证优惠目录的创建、更新、删除与批量启停，
//! 重点覆盖折扣配对规则与名称唯一性约束。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... REDIS_URL=redis://... \
//!   cargo test --test offer_catalog_test -- --ignored
//! ```

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use sqlx::PgPool;

use loyalty_service::models::DiscountType;
use loyalty_service::repository::{OfferRepository, VehicleOfferRepository};
use loyalty_service::service::OfferCatalogService;
use loyalty_service::service::dto::{
    BulkSetActiveRequest, CreateOfferRequest, OfferFilter, PaginationParams, UpdateOfferRequest,
};
use loyalty_shared::cache::Cache;
use loyalty_shared::config::RedisConfig;
use loyalty_shared::test_utils::test_offer_name;

// ==================== 辅助函数 ====================

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn test_pool() -> PgPool {
    let pool = PgPool::connect(&database_url())
        .await
        .expect("数据库连接失败");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("迁移执行失败");
    pool
}

fn setup_catalog(pool: &PgPool) -> OfferCatalogService<OfferRepository, VehicleOfferRepository> {
    let cache = Arc::new(
        Cache::new(&RedisConfig {
            url: redis_url(),
            pool_size: 2,
        })
        .expect("Redis 客户端创建失败"),
    );
    OfferCatalogService::new(
        Arc::new(OfferRepository::new(pool.clone())),
        Arc::new(VehicleOfferRepository::new(pool.clone())),
        cache,
    )
}

fn free_wash_request(name: String, threshold: i32) -> CreateOfferRequest {
    CreateOfferRequest {
        name,
        description: Some("连续到店满额免单".to_string()),
        visit_threshold: threshold,
        discount_type: DiscountType::FreeWash,
        discount_value: None,
        is_active: None,
        valid_from: None,
        valid_until: None,
    }
}

// ==================== 测试 ====================

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_create_then_get_round_trip() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let name = test_offer_name("五次免单");
    let created = catalog
        .create(free_wash_request(name.clone(), 5))
        .await
        .expect("创建优惠失败");

    let fetched = catalog.get(created.id).await.expect("查询优惠失败");
    assert_eq!(fetched.name, name);
    assert_eq!(fetched.visit_threshold, 5);
    assert_eq!(fetched.discount_type, DiscountType::FreeWash);
    assert_eq!(fetched.discount_value, 0.0);
    // is_active 省略时默认启用
    assert!(fetched.is_active);
    assert!(fetched.valid_from.is_none());
    assert!(fetched.valid_until.is_none());
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_percentage_requires_positive_value() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let mut request = free_wash_request(test_offer_name("九折"), 3);
    request.discount_type = DiscountType::Percentage;
    request.discount_value = Some(0.0);

    let err = catalog.create(request).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_duplicate_name_conflict() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let name = test_offer_name("重名");
    catalog
        .create(free_wash_request(name.clone(), 5))
        .await
        .expect("首次创建失败");

    let err = catalog
        .create(free_wash_request(name, 8))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE_OFFER_NAME");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_update_patch_keeps_unset_fields() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let created = catalog
        .create(free_wash_request(test_offer_name("待更新"), 5))
        .await
        .expect("创建优惠失败");

    let updated = catalog
        .update(
            created.id,
            UpdateOfferRequest {
                visit_threshold: Some(8),
                ..Default::default()
            },
        )
        .await
        .expect("更新优惠失败");

    assert_eq!(updated.visit_threshold, 8);
    assert_eq!(updated.name, created.name);
    assert_eq!(updated.discount_type, DiscountType::FreeWash);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_update_missing_offer_not_found() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let err = catalog
        .update(
            i64::MAX - 7,
            UpdateOfferRequest {
                visit_threshold: Some(8),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "OFFER_NOT_FOUND");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_bulk_set_active_skips_unknown_ids() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let a = catalog
        .create(free_wash_request(test_offer_name("批量A"), 5))
        .await
        .expect("创建优惠失败");
    let b = catalog
        .create(free_wash_request(test_offer_name("批量B"), 6))
        .await
        .expect("创建优惠失败");

    let affected = catalog
        .bulk_set_active(BulkSetActiveRequest {
            offer_ids: vec![a.id, b.id, i64::MAX - 7],
            is_active: false,
        })
        .await
        .expect("批量停用失败");
    assert_eq!(affected, 2);

    assert!(!catalog.get(a.id).await.unwrap().is_active);
    assert!(!catalog.get(b.id).await.unwrap().is_active);

    // 重复设置同一状态仍然成功，不产生额外副作用
    let affected = catalog
        .bulk_set_active(BulkSetActiveRequest {
            offer_ids: vec![a.id, b.id],
            is_active: false,
        })
        .await
        .expect("重复批量停用失败");
    assert_eq!(affected, 2);
    assert!(!catalog.get(a.id).await.unwrap().is_active);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_delete_unused_offer() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let created = catalog
        .create(free_wash_request(test_offer_name("待删除"), 5))
        .await
        .expect("创建优惠失败");

    catalog.delete(created.id).await.expect("删除优惠失败");

    let err = catalog.get(created.id).await.unwrap_err();
    assert_eq!(err.error_code(), "OFFER_NOT_FOUND");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_delete_issued_offer_rejected() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let created = catalog
        .create(free_wash_request(test_offer_name("已发放"), 5))
        .await
        .expect("创建优惠失败");

    // 直接落一条发放记录，模拟已被发放过的优惠
    sqlx::query(
        "INSERT INTO vehicle_offers (vehicle_id, offer_id, issued_date, status)
         VALUES ($1, $2, NOW(), 'used')",
    )
    .bind(990_001_i64)
    .bind(created.id)
    .execute(&pool)
    .await
    .expect("插入发放记录失败");

    let err = catalog.delete(created.id).await.unwrap_err();
    assert_eq!(err.error_code(), "OFFER_IN_USE");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_list_valid_on_filter() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let today = Utc::now().date_naive();
    let name = test_offer_name("限期");
    let mut request = free_wash_request(name.clone(), 5);
    request.valid_from = Some(today - Duration::days(10));
    request.valid_until = Some(today - Duration::days(1));
    let expired = catalog.create(request).await.expect("创建优惠失败");

    // 窗口已过的优惠不应出现在"当日有效"过滤结果里
    let page = catalog
        .list(
            OfferFilter {
                name_keyword: Some(name),
                valid_on: Some(today),
                ..Default::default()
            },
            PaginationParams::default(),
        )
        .await
        .expect("查询优惠失败");
    assert!(page.items.iter().all(|o| o.id != expired.id));

    // 不带日期过滤则能查到
    let page = catalog
        .list(
            OfferFilter {
                name_keyword: Some(expired.name.clone()),
                ..Default::default()
            },
            PaginationParams::default(),
        )
        .await
        .expect("查询优惠失败");
    assert!(page.items.iter().any(|o| o.id == expired.id));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 和 Redis"]
async fn test_validity_window_rejected_when_inverted() {
    let pool = test_pool().await;
    let catalog = setup_catalog(&pool);

    let mut request = free_wash_request(test_offer_name("窗口倒置"), 5);
    request.valid_from = NaiveDate::from_ymd_opt(2026, 6, 1);
    request.valid_until = NaiveDate::from_ymd_opt(2026, 5, 1);

    let err = catalog.create(request).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}
