//! 忠诚度服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 优惠折扣类型
///
/// 决定 discount_value 的语义和校验规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DiscountType {
    /// 按百分比折扣 - discount_value 为折扣百分比，必须大于 0
    Percentage,
    /// 固定金额减免 - discount_value 为减免金额，必须大于 0
    FixedAmount,
    /// 免费洗车 - 整单免费，discount_value 固定为 0
    FreeWash,
}

impl DiscountType {
    /// 该折扣类型是否要求正的折扣数值
    ///
    /// free_wash 不需要数值（强制为 0），其余类型必须大于 0
    pub fn requires_value(&self) -> bool {
        !matches!(self, Self::FreeWash)
    }
}

/// 车辆优惠状态
///
/// 追踪已发放优惠实例的生命周期
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum VehicleOfferStatus {
    /// 生效中 - 已发放，等待核销
    #[default]
    Active,
    /// 已使用 - 在后续到店时核销（终态）
    Used,
    /// 已过期 - 超出优惠有效期（终态）
    Expired,
}

impl VehicleOfferStatus {
    /// 判断是否为终态
    ///
    /// 终态记录除 notes 外不可再变更
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Used | Self::Expired)
    }

    /// 返回数据库存储值
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
        }
    }
}
