//! 服务层数据传输对象
//!
//! 定义服务层与外部交互使用的请求、过滤与响应结构，与内部领域模型解耦

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    DiscountType, VehicleOfferStatus,
    offer::{NewOffer, OfferPatch},
};

// ==================== 通用 ====================

/// 车辆定位参数
///
/// 车辆 ID 与车牌二选一，同时提供时以车辆 ID 为准
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRef {
    pub vehicle_id: Option<i64>,
    pub license_plate: Option<String>,
}

impl VehicleRef {
    pub fn by_id(vehicle_id: i64) -> Self {
        Self {
            vehicle_id: Some(vehicle_id),
            license_plate: None,
        }
    }

    pub fn by_plate(license_plate: impl Into<String>) -> Self {
        Self {
            vehicle_id: None,
            license_plate: Some(license_plate.into()),
        }
    }
}

/// 分页查询参数
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PaginationParams {
    /// 计算数据库查询的 offset
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0) * self.limit()
    }

    /// 获取限制条数（最大100）
    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, 100)
    }
}

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PageResponse<T> {
    /// 创建分页响应
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

// ==================== 优惠目录 ====================

/// 创建优惠请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOfferRequest {
    #[validate(length(min = 1, max = 100, message = "优惠名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[validate(length(max = 500, message = "优惠描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(range(min = 1, message = "到店次数门槛必须大于0"))]
    pub visit_threshold: i32,
    pub discount_type: DiscountType,
    /// percentage/fixed_amount 必填且大于 0，free_wash 忽略并固定为 0
    pub discount_value: Option<f64>,
    /// 省略时默认启用
    pub is_active: Option<bool>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

impl CreateOfferRequest {
    /// 转换为落库参数（折扣数值须已通过服务层归一化）
    pub fn into_new_offer(self, discount_value: f64) -> NewOffer {
        NewOffer {
            name: self.name,
            description: self.description,
            visit_threshold: self.visit_threshold,
            discount_type: self.discount_type,
            discount_value,
            is_active: self.is_active.unwrap_or(true),
            valid_from: self.valid_from,
            valid_until: self.valid_until,
        }
    }
}

/// 更新优惠请求，字段为 None 表示保持原值
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOfferRequest {
    #[validate(length(min = 1, max = 100, message = "优惠名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "优惠描述不能超过500个字符"))]
    pub description: Option<String>,
    #[validate(range(min = 1, message = "到店次数门槛必须大于0"))]
    pub visit_threshold: Option<i32>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<f64>,
    pub is_active: Option<bool>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

impl UpdateOfferRequest {
    pub fn into_patch(self) -> OfferPatch {
        OfferPatch {
            name: self.name,
            description: self.description,
            visit_threshold: self.visit_threshold,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            is_active: self.is_active,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
        }
    }
}

/// 优惠列表查询过滤
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFilter {
    pub is_active: Option<bool>,
    pub discount_type: Option<DiscountType>,
    pub min_threshold: Option<i32>,
    pub max_threshold: Option<i32>,
    /// 名称关键字，模糊匹配
    pub name_keyword: Option<String>,
    /// 仅返回该日期处于有效期窗口内的优惠
    pub valid_on: Option<NaiveDate>,
}

/// 批量启停优惠请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkSetActiveRequest {
    #[validate(length(min = 1, message = "优惠 ID 列表不能为空"))]
    pub offer_ids: Vec<i64>,
    pub is_active: bool,
}

// ==================== 到店台账 ====================

/// 记录到店请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordVisitRequest {
    pub vehicle_id: Option<i64>,
    /// 车牌未登记时自动在车辆目录登记
    pub license_plate: Option<String>,
    /// 触发本次记录的服务单 ID，发放优惠时溯源用
    pub visit_id: Option<i64>,
}

/// 人工修正统计请求，字段为 None 表示保持原值
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStatsRequest {
    #[validate(range(min = 0, message = "累计到店数不能为负"))]
    pub total_visits: Option<i32>,
    #[validate(range(min = 0, message = "当前连续到店数不能为负"))]
    pub current_visit_count: Option<i32>,
    #[validate(range(min = 0, message = "累计获得优惠数不能为负"))]
    pub total_offers_earned: Option<i32>,
    #[validate(range(min = 0, message = "累计使用优惠数不能为负"))]
    pub total_offers_used: Option<i32>,
}

impl AdjustStatsRequest {
    pub fn is_empty(&self) -> bool {
        self.total_visits.is_none()
            && self.current_visit_count.is_none()
            && self.total_offers_earned.is_none()
            && self.total_offers_used.is_none()
    }
}

// ==================== 优惠发放与核销 ====================

/// 人工发放优惠请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IssueOfferRequest {
    pub vehicle_id: Option<i64>,
    pub license_plate: Option<String>,
    pub offer_id: i64,
    pub visit_id: Option<i64>,
    #[validate(length(max = 500, message = "备注不能超过500个字符"))]
    pub notes: Option<String>,
}

impl IssueOfferRequest {
    pub fn vehicle_ref(&self) -> VehicleRef {
        VehicleRef {
            vehicle_id: self.vehicle_id,
            license_plate: self.license_plate.clone(),
        }
    }
}

/// 核销优惠请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkUsedRequest {
    /// 核销发生的服务单 ID
    pub used_on_visit_id: i64,
    #[validate(length(max = 500, message = "备注不能超过500个字符"))]
    pub notes: Option<String>,
}

/// 发放记录列表查询过滤
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleOfferFilter {
    pub vehicle_id: Option<i64>,
    /// 按车牌过滤，未登记车牌返回空结果
    pub license_plate: Option<String>,
    pub offer_id: Option<i64>,
    pub status: Option<VehicleOfferStatus>,
    pub issued_from: Option<DateTime<Utc>>,
    pub issued_to: Option<DateTime<Utc>>,
}

/// 批量过期发放记录请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkExpireRequest {
    #[validate(length(min = 1, message = "发放记录 ID 列表不能为空"))]
    pub vehicle_offer_ids: Vec<i64>,
    #[validate(length(max = 500, message = "备注不能超过500个字符"))]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_offset() {
        let params = PaginationParams::default();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 20);
        assert_eq!(params.offset(), 0);

        let params = PaginationParams {
            page: 3,
            page_size: 50,
        };
        assert_eq!(params.offset(), 100);
        assert_eq!(params.limit(), 50);

        // 超出上限时截断到 100
        let params = PaginationParams {
            page: 1,
            page_size: 1000,
        };
        assert_eq!(params.limit(), 100);
    }

    #[test]
    fn test_page_response_total_pages() {
        let response = PageResponse::new(vec![1, 2, 3], 101, 2, 10);
        assert_eq!(response.total_pages, 11);
        assert_eq!(response.page, 2);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["totalPages"], 11);
        assert_eq!(json["pageSize"], 10);
    }

    #[test]
    fn test_create_offer_request_validation() {
        let valid = CreateOfferRequest {
            name: "十次洗车折上折".to_string(),
            description: None,
            visit_threshold: 10,
            discount_type: DiscountType::Percentage,
            discount_value: Some(15.0),
            is_active: None,
            valid_from: None,
            valid_until: None,
        };
        assert!(valid.validate().is_ok());

        let invalid = CreateOfferRequest {
            name: "".to_string(),
            description: None,
            visit_threshold: 0,
            discount_type: DiscountType::FreeWash,
            discount_value: None,
            is_active: None,
            valid_from: None,
            valid_until: None,
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_create_offer_request_defaults_active() {
        let request = CreateOfferRequest {
            name: "五次免单".to_string(),
            description: None,
            visit_threshold: 5,
            discount_type: DiscountType::FreeWash,
            discount_value: None,
            is_active: None,
            valid_from: None,
            valid_until: None,
        };

        let new_offer = request.into_new_offer(0.0);
        assert!(new_offer.is_active);
        assert_eq!(new_offer.discount_value, 0.0);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: RecordVisitRequest = serde_json::from_str(
            r#"{"licensePlate": "KDA 123X", "visitId": 42}"#,
        )
        .unwrap();
        assert_eq!(request.license_plate.as_deref(), Some("KDA 123X"));
        assert_eq!(request.visit_id, Some(42));
        assert!(request.vehicle_id.is_none());

        let request: MarkUsedRequest =
            serde_json::from_str(r#"{"usedOnVisitId": 7}"#).unwrap();
        assert_eq!(request.used_on_visit_id, 7);
    }

    #[test]
    fn test_adjust_stats_request_is_empty() {
        assert!(AdjustStatsRequest::default().is_empty());

        let request = AdjustStatsRequest {
            current_visit_count: Some(0),
            ..Default::default()
        };
        assert!(!request.is_empty());
    }

    #[test]
    fn test_bulk_requests_reject_empty_ids() {
        let request = BulkSetActiveRequest {
            offer_ids: vec![],
            is_active: false,
        };
        assert!(request.validate().is_err());

        let request = BulkExpireRequest {
            vehicle_offer_ids: vec![],
            notes: None,
        };
        assert!(request.validate().is_err());
    }
}
