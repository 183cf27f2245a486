//! 优惠定义实体
//!
//! 优惠是不绑定具体车辆的营销规则：到店次数门槛 + 折扣内容 + 有效期窗口。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::DiscountType;

/// 优惠定义
///
/// 由运营创建，按到店次数门槛向车辆发放
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: i64,
    /// 优惠名称（全局唯一）
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 触发发放所需的连续到店次数，必须大于 0
    pub visit_threshold: i32,
    /// 折扣类型
    pub discount_type: DiscountType,
    /// 折扣数值，语义由 discount_type 决定
    pub discount_value: f64,
    /// 是否启用（停用后不再参与发放评估）
    pub is_active: bool,
    /// 生效日期（null 表示不限制起始）
    #[sqlx(default)]
    pub valid_from: Option<NaiveDate>,
    /// 失效日期（null 表示长期有效）
    #[sqlx(default)]
    pub valid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// 检查指定日期是否落在有效期窗口内
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.valid_from.is_none_or(|d| d <= date) && self.valid_until.is_none_or(|d| d >= date)
    }

    /// 检查指定日期是否可参与发放评估
    pub fn is_issuable_on(&self, date: NaiveDate) -> bool {
        self.is_active && self.is_valid_on(date)
    }

    /// 检查优惠在指定日期是否已超出有效期
    ///
    /// 仅 valid_until 早于该日期才算过期，无失效日期的优惠永不过期
    pub fn is_expired_by(&self, date: NaiveDate) -> bool {
        self.valid_until.is_some_and(|d| d < date)
    }

    /// 合并部分更新，得到更新后的完整定义（用于更新前校验）
    pub fn merged_with(&self, patch: &OfferPatch) -> Offer {
        Offer {
            id: self.id,
            name: patch.name.clone().unwrap_or_else(|| self.name.clone()),
            description: patch
                .description
                .clone()
                .or_else(|| self.description.clone()),
            visit_threshold: patch.visit_threshold.unwrap_or(self.visit_threshold),
            discount_type: patch.discount_type.unwrap_or(self.discount_type),
            discount_value: patch.discount_value.unwrap_or(self.discount_value),
            is_active: patch.is_active.unwrap_or(self.is_active),
            valid_from: patch.valid_from.or(self.valid_from),
            valid_until: patch.valid_until.or(self.valid_until),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// 新建优惠的落库参数（已通过服务层校验与归一化）
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub name: String,
    pub description: Option<String>,
    pub visit_threshold: i32,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub is_active: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

/// 优惠部分更新
///
/// 字段为 None 表示保持原值，不支持把已有可空字段清空
#[derive(Debug, Clone, Default)]
pub struct OfferPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visit_threshold: Option<i32>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<f64>,
    pub is_active: Option<bool>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}
