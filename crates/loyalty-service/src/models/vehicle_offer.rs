//! 车辆优惠实体与生命周期状态机
//!
//! 每行代表一次已发放的优惠实例。状态转移单向：
//! active → used（终态）或 active → expired（终态）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::VehicleOfferStatus;

/// 已发放的车辆优惠实例
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VehicleOffer {
    pub id: i64,
    pub vehicle_id: i64,
    /// 关联的优惠定义 ID
    pub offer_id: i64,
    /// 触发发放的到店记录 ID（手动发放时为空）
    #[sqlx(default)]
    pub earned_on_visit_id: Option<i64>,
    /// 发放时间
    pub issued_date: DateTime<Utc>,
    /// 生命周期状态
    pub status: VehicleOfferStatus,
    /// 核销时间（仅 used 状态有值）
    #[sqlx(default)]
    pub used_date: Option<DateTime<Utc>>,
    /// 核销所在的到店记录 ID
    #[sqlx(default)]
    pub used_on_visit_id: Option<i64>,
    /// 备注（过期原因、人工操作说明等）
    #[sqlx(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VehicleOffer {
    /// 是否处于生效状态
    pub fn is_active(&self) -> bool {
        self.status == VehicleOfferStatus::Active
    }

    /// 导出带数据的生命周期视图
    ///
    /// used 状态下 used_date 缺失时回退到行更新时间
    pub fn lifecycle(&self) -> OfferLifecycle {
        match self.status {
            VehicleOfferStatus::Active => OfferLifecycle::Active,
            VehicleOfferStatus::Used => OfferLifecycle::Used {
                used_date: self.used_date.unwrap_or(self.updated_at),
                used_on_visit_id: self.used_on_visit_id,
            },
            VehicleOfferStatus::Expired => OfferLifecycle::Expired {
                reason: self.notes.clone(),
            },
        }
    }
}

/// 生命周期状态的显式带数据表示
///
/// 终态变体携带转移时写入的数据，转移函数只接受 Active 作为源状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferLifecycle {
    /// 生效中，等待核销或过期
    Active,
    /// 已核销
    Used {
        used_date: DateTime<Utc>,
        used_on_visit_id: Option<i64>,
    },
    /// 已过期
    Expired { reason: Option<String> },
}

/// 非法状态转移，携带被拒绝时的源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: VehicleOfferStatus,
}

impl OfferLifecycle {
    /// 对应的存储状态值
    pub fn status(&self) -> VehicleOfferStatus {
        match self {
            Self::Active => VehicleOfferStatus::Active,
            Self::Used { .. } => VehicleOfferStatus::Used,
            Self::Expired { .. } => VehicleOfferStatus::Expired,
        }
    }

    /// 核销转移：active → used
    ///
    /// 终态下调用返回 InvalidTransition，不产生任何变化
    pub fn redeem(
        self,
        used_date: DateTime<Utc>,
        used_on_visit_id: i64,
    ) -> Result<Self, InvalidTransition> {
        match self {
            Self::Active => Ok(Self::Used {
                used_date,
                used_on_visit_id: Some(used_on_visit_id),
            }),
            other => Err(InvalidTransition {
                from: other.status(),
            }),
        }
    }

    /// 过期转移：active → expired
    pub fn expire(self, reason: Option<String>) -> Result<Self, InvalidTransition> {
        match self {
            Self::Active => Ok(Self::Expired { reason }),
            other => Err(InvalidTransition {
                from: other.status(),
            }),
        }
    }
}
