//! 服务层
//!
//! 实现忠诚度业务逻辑，协调仓储层、车辆目录与缓存层。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `catalog_service`: 优惠目录管理（创建/更新/删除/批量启停）
//! - `visit_ledger`: 到店台账（计数记录与修正）
//! - `engine_service`: 发放引擎（发放/核销/过期状态机）
//! - `query_service`: 只读查询（缓存优先）

pub mod catalog_service;
pub mod dto;
pub mod engine_service;
pub mod query_service;
pub mod visit_ledger;

pub use catalog_service::OfferCatalogService;
pub use engine_service::LoyaltyEngineService;
pub use query_service::LoyaltyQueryService;
pub use visit_ledger::VisitLedgerService;
