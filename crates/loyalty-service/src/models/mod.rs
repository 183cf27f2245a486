//! 忠诚度服务领域模型
//!
//! 包含优惠、车辆访问统计、车辆优惠实例等核心实体定义

pub mod enums;
pub mod offer;
pub mod vehicle_offer;
pub mod vehicle_stats;

// 重新导出常用类型
pub use enums::{DiscountType, VehicleOfferStatus};
pub use offer::Offer;
pub use vehicle_offer::{InvalidTransition, OfferLifecycle, VehicleOffer};
pub use vehicle_stats::VehicleStats;
