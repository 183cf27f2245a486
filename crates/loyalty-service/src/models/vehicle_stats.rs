//! 车辆访问统计实体
//!
//! 每辆车一行，记录生命周期访问计数和自上次核销以来的连续到店次数。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 车辆访问统计
///
/// 计数器只增不删；current_visit_count 仅在核销后清零
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStats {
    pub vehicle_id: i64,
    /// 累计到店次数（单调递增）
    pub total_visits: i32,
    /// 自上次核销以来的连续到店次数（可清零）
    pub current_visit_count: i32,
    /// 累计获得的优惠数
    pub total_offers_earned: i32,
    /// 累计核销的优惠数
    pub total_offers_used: i32,
    /// 最近一次到店时间
    #[sqlx(default)]
    pub last_visit_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VehicleStats {
    /// 检查计数器不变量
    ///
    /// current_visit_count ≤ total_visits 且 total_offers_used ≤ total_offers_earned
    pub fn is_consistent(&self) -> bool {
        self.current_visit_count <= self.total_visits
            && self.total_offers_used <= self.total_offers_earned
    }

    /// 连续到店次数是否达到指定门槛
    pub fn has_reached(&self, threshold: i32) -> bool {
        self.current_visit_count >= threshold
    }
}
