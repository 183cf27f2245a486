//! 洗车忠诚度服务
//!
//! 多门店洗车/地毯清洗业务的车辆忠诚度子系统：按车辆累计到店次数，
//! 在连续到店数达到优惠门槛时发放促销优惠，并管理优惠实例从发放到
//! 核销/过期的完整生命周期。
//!
//! ## 核心功能
//!
//! - **优惠目录**：优惠定义的创建、更新、批量启停与有效期窗口管理
//! - **到店台账**：每车一行的原子到店计数（累计 + 自上次核销以来的连续计数）
//! - **发放引擎**：到店后按门槛评估发放，核销/过期的单向状态机
//! - **过期清扫**：后台定期把有效期已过的 active 优惠转为 expired
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义（含生命周期状态的显式表示）
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层
//! - `directory`: 车辆目录接口（车牌 → 车辆 ID）
//! - `service`: 业务服务层
//! - `worker`: 后台维护任务

pub mod directory;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;

pub use directory::{PgVehicleDirectory, VehicleAttrs, VehicleDirectory};
pub use error::{LoyaltyError, Result};
pub use models::*;
pub use repository::{OfferRepository, VehicleOfferRepository, VehicleStatsRepository};
pub use service::{
    LoyaltyEngineService, LoyaltyQueryService, OfferCatalogService, VisitLedgerService, dto,
};
pub use worker::OfferExpiryWorker;
