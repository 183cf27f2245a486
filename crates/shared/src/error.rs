//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务层错误由各服务 crate 自行定义。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = LoyaltyError::Internal("boom".to_string());
        assert_eq!(err.code(), "INTERNAL_ERROR");

        let err = LoyaltyError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = LoyaltyError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let internal = LoyaltyError::Internal("x".to_string());
        assert!(!internal.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LoyaltyError::Internal("缓存序列化失败".to_string());
        assert_eq!(err.to_string(), "内部错误: 缓存序列化失败");
    }
}
