//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 事务控制由调用方（服务层）决定，事务内操作以 `_in_tx` 结尾
//! - 定义 trait 接口以支持 mock 测试

mod offer_repo;
mod stats_repo;
mod traits;
mod vehicle_offer_repo;

pub use offer_repo::OfferRepository;
pub use stats_repo::VehicleStatsRepository;
pub use traits::*;
pub use vehicle_offer_repo::VehicleOfferRepository;
