//! 车辆目录
//!
//! 车牌号到车辆 ID 的解析属于车辆主数据域，本服务只消费接口。
//! 默认提供基于本库 vehicles 表的实现，部署时可替换为外部目录服务

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;

/// 登记车辆时的可选属性
#[derive(Debug, Clone, Default)]
pub struct VehicleAttrs {
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
}

/// 车辆目录接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    /// 按车牌解析车辆 ID，未登记返回 None
    async fn resolve(&self, license_plate: &str) -> Result<Option<i64>>;
    /// 登记车辆并返回 ID，车牌已存在时返回既有 ID
    async fn create(&self, license_plate: &str, attrs: &VehicleAttrs) -> Result<i64>;
}

/// 基于本库 vehicles 表的车辆目录实现
pub struct PgVehicleDirectory {
    pool: PgPool,
}

impl PgVehicleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VehicleDirectory for PgVehicleDirectory {
    async fn resolve(&self, license_plate: &str) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM vehicles WHERE license_plate = $1")
                .bind(license_plate)
                .fetch_optional(&self.pool)
                .await?;

        Ok(id)
    }

    async fn create(&self, license_plate: &str, attrs: &VehicleAttrs) -> Result<i64> {
        // 车牌撞唯一约束时回填属性并返回既有行，并发登记同一车牌也只会产生一行
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO vehicles (license_plate, make, model, color)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (license_plate) DO UPDATE
            SET make = COALESCE(EXCLUDED.make, vehicles.make),
                model = COALESCE(EXCLUDED.model, vehicles.model),
                color = COALESCE(EXCLUDED.color, vehicles.color),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(license_plate)
        .bind(&attrs.make)
        .bind(&attrs.model)
        .bind(&attrs.color)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}
