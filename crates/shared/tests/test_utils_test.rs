//! test_utils 模块的集成测试
//!
//! 验证测试数据生成器的唯一性与格式约定

use std::collections::HashSet;

use loyalty_shared::test_utils::*;

#[test]
fn test_vehicle_id_uniqueness() {
    let ids: Vec<i64> = (0..100).map(|_| test_vehicle_id()).collect();
    let unique_count = ids.iter().collect::<HashSet<_>>().len();

    assert_eq!(unique_count, 100, "生成的车辆 ID 应该唯一");
    assert!(ids.iter().all(|id| *id > 0));
}

#[test]
fn test_license_plate_uniqueness_and_format() {
    let plates: Vec<String> = (0..50).map(|_| test_license_plate()).collect();
    let unique_count = plates.iter().collect::<HashSet<_>>().len();

    assert_eq!(unique_count, 50, "生成的车牌应该唯一");
    for plate in &plates {
        assert!(plate.starts_with("KTEST-"));
        assert_eq!(plate.len(), "KTEST-".len() + 8);
    }
}

#[test]
fn test_offer_name_keeps_prefix() {
    let a = test_offer_name("五次免单");
    let b = test_offer_name("五次免单");

    assert!(a.starts_with("五次免单-"));
    assert_ne!(a, b, "同一前缀的优惠名称也应该唯一");
}

#[test]
fn test_database_config_creation() {
    let config = test_database_config();

    assert!(config.url.contains("postgres://"));
    assert!(config.max_connections > 0);
    assert!(config.connect_timeout_seconds > 0);
}

#[test]
fn test_redis_config_creation() {
    let config = test_redis_config();

    assert!(config.url.contains("redis://"));
    assert!(config.pool_size > 0);
}
