//! 忠诚度服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;

/// 忠诚度服务错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 优惠定义相关错误 ===
    #[error("优惠不存在: {0}")]
    OfferNotFound(i64),

    #[error("优惠名称已存在: {0}")]
    DuplicateOfferName(String),

    #[error("优惠已停用: offer_id={0}")]
    OfferInactive(i64),

    #[error("优惠不在有效期内: offer_id={0}")]
    OfferOutsideValidity(i64),

    #[error("优惠已被发放使用，无法删除: offer_id={0}")]
    OfferInUse(i64),

    // === 车辆相关错误 ===
    #[error("车辆不存在: license_plate={0}")]
    VehicleNotFound(String),

    #[error("车辆访问统计不存在: vehicle_id={0}")]
    VehicleStatsNotFound(i64),

    // === 车辆优惠相关错误 ===
    #[error("车辆优惠不存在: {0}")]
    VehicleOfferNotFound(i64),

    #[error("车辆已持有该优惠的生效实例: vehicle_id={vehicle_id}, offer_id={offer_id}")]
    DuplicateActiveOffer { vehicle_id: i64, offer_id: i64 },

    #[error(
        "优惠状态不允许此操作: vehicle_offer_id={vehicle_offer_id}, current_status={current_status}, attempted={attempted}"
    )]
    InvalidOfferState {
        vehicle_offer_id: i64,
        current_status: String,
        attempted: String,
    },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),
}

/// 忠诚度服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for LoyaltyError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl LoyaltyError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Cache(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Cache(_) | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::OfferNotFound(_) => "OFFER_NOT_FOUND",
            Self::DuplicateOfferName(_) => "DUPLICATE_OFFER_NAME",
            Self::OfferInactive(_) => "OFFER_INACTIVE",
            Self::OfferOutsideValidity(_) => "OFFER_OUTSIDE_VALIDITY",
            Self::OfferInUse(_) => "OFFER_IN_USE",
            Self::VehicleNotFound(_) => "VEHICLE_NOT_FOUND",
            Self::VehicleStatsNotFound(_) => "VEHICLE_STATS_NOT_FOUND",
            Self::VehicleOfferNotFound(_) => "VEHICLE_OFFER_NOT_FOUND",
            Self::DuplicateActiveOffer { .. } => "DUPLICATE_ACTIVE_OFFER",
            Self::InvalidOfferState { .. } => "INVALID_OFFER_STATE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(LoyaltyError::Cache("connection failed".to_string()).is_retryable());
        assert!(!LoyaltyError::OfferNotFound(1).is_retryable());
        assert!(
            !LoyaltyError::DuplicateActiveOffer {
                vehicle_id: 7,
                offer_id: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(LoyaltyError::OfferNotFound(1).is_business_error());
        assert!(
            LoyaltyError::InvalidOfferState {
                vehicle_offer_id: 5,
                current_status: "used".to_string(),
                attempted: "mark_used".to_string(),
            }
            .is_business_error()
        );
        assert!(!LoyaltyError::Internal("panic".to_string()).is_business_error());
        assert!(!LoyaltyError::Cache("timeout".to_string()).is_business_error());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(LoyaltyError::OfferNotFound(1).error_code(), "OFFER_NOT_FOUND");
        assert_eq!(
            LoyaltyError::DuplicateActiveOffer {
                vehicle_id: 7,
                offer_id: 3
            }
            .error_code(),
            "DUPLICATE_ACTIVE_OFFER"
        );
        assert_eq!(
            LoyaltyError::Validation("bad input".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
    }

    /// validator 是请求参数校验的统一入口，转换必须把字段级错误信息带入 LoyaltyError
    #[test]
    fn test_from_validation_errors() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        let mut field_error = ValidationError::new("range");
        field_error.message = Some("到店次数门槛必须大于 0".into());
        errors.add("visit_threshold", field_error);

        let err: LoyaltyError = errors.into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("visit_threshold"));
    }

    #[test]
    fn test_error_display() {
        let err = LoyaltyError::DuplicateActiveOffer {
            vehicle_id: 42,
            offer_id: 9,
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("9"));

        let err = LoyaltyError::InvalidOfferState {
            vehicle_offer_id: 11,
            current_status: "expired".to_string(),
            attempted: "mark_used".to_string(),
        };
        assert!(err.to_string().contains("expired"));
        assert!(err.to_string().contains("mark_used"));
    }
}
