//! 车辆访问统计仓储
//!
//! 提供 vehicle_stats 表的数据访问，计数更新全部走单语句原子 SQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::VehicleStatsRepositoryTrait;
use crate::error::Result;
use crate::models::VehicleStats;

/// 车辆访问统计仓储
///
/// 以 vehicle_id 为主键，一车一行。累加类更新使用
/// INSERT ... ON CONFLICT DO UPDATE，并发记录同一车辆不会丢计数
pub struct VehicleStatsRepository {
    pool: PgPool,
}

impl VehicleStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询 ====================

    /// 获取车辆统计
    pub async fn get_stats(&self, vehicle_id: i64) -> Result<Option<VehicleStats>> {
        let stats = sqlx::query_as::<_, VehicleStats>(
            r#"
            SELECT vehicle_id, total_visits, current_visit_count, total_offers_earned,
                   total_offers_used, last_visit_date, created_at, updated_at
            FROM vehicle_stats
            WHERE vehicle_id = $1
            "#,
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stats)
    }

    // ==================== 计数更新 ====================

    /// 记录一次到店
    ///
    /// 累计与当前连续计数各加一，刷新最近到店时间。
    /// 统计行不存在时在同一条语句里创建，返回更新后的完整统计
    pub async fn record_visit(
        &self,
        vehicle_id: i64,
        visited_at: DateTime<Utc>,
    ) -> Result<VehicleStats> {
        let stats = sqlx::query_as::<_, VehicleStats>(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used, last_visit_date)
            VALUES ($1, 1, 1, 0, 0, $2)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET total_visits = vehicle_stats.total_visits + 1,
                current_visit_count = vehicle_stats.current_visit_count + 1,
                last_visit_date = EXCLUDED.last_visit_date,
                updated_at = NOW()
            RETURNING vehicle_id, total_visits, current_visit_count, total_offers_earned,
                      total_offers_used, last_visit_date, created_at, updated_at
            "#,
        )
        .bind(vehicle_id)
        .bind(visited_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    /// 清零当前连续到店计数，返回受影响行数
    ///
    /// 0 表示统计行不存在，累计到店数不受影响
    pub async fn reset_visit_count(&self, vehicle_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE vehicle_stats
            SET current_visit_count = 0, updated_at = NOW()
            WHERE vehicle_id = $1
            "#,
        )
        .bind(vehicle_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 累计获得优惠数加一，统计行不存在时先建零值行
    pub async fn increment_offers_earned(&self, vehicle_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used)
            VALUES ($1, 0, 0, 1, 0)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET total_offers_earned = vehicle_stats.total_offers_earned + 1,
                updated_at = NOW()
            "#,
        )
        .bind(vehicle_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 累计使用优惠数加一，统计行不存在时先建零值行
    pub async fn increment_offers_used(&self, vehicle_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used)
            VALUES ($1, 0, 0, 0, 1)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET total_offers_used = vehicle_stats.total_offers_used + 1,
                updated_at = NOW()
            "#,
        )
        .bind(vehicle_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 幂等创建零值统计行，返回当前行
    ///
    /// 行已存在时不做任何修改
    pub async fn initialize(&self, vehicle_id: i64) -> Result<VehicleStats> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used)
            VALUES ($1, 0, 0, 0, 0)
            ON CONFLICT (vehicle_id) DO NOTHING
            "#,
        )
        .bind(vehicle_id)
        .execute(&self.pool)
        .await?;

        let stats = sqlx::query_as::<_, VehicleStats>(
            r#"
            SELECT vehicle_id, total_visits, current_visit_count, total_offers_earned,
                   total_offers_used, last_visit_date, created_at, updated_at
            FROM vehicle_stats
            WHERE vehicle_id = $1
            "#,
        )
        .bind(vehicle_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    /// 人工修正计数器，返回受影响行数
    ///
    /// 字段为 None 表示保持原值，合法性由服务层校验
    pub async fn adjust(
        &self,
        vehicle_id: i64,
        total_visits: Option<i32>,
        current_visit_count: Option<i32>,
        total_offers_earned: Option<i32>,
        total_offers_used: Option<i32>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE vehicle_stats
            SET
                total_visits = COALESCE($2, total_visits),
                current_visit_count = COALESCE($3, current_visit_count),
                total_offers_earned = COALESCE($4, total_offers_earned),
                total_offers_used = COALESCE($5, total_offers_used),
                updated_at = NOW()
            WHERE vehicle_id = $1
            "#,
        )
        .bind(vehicle_id)
        .bind(total_visits)
        .bind(current_visit_count)
        .bind(total_offers_earned)
        .bind(total_offers_used)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== 事务内操作 ====================

    /// 事务内清零当前连续到店计数，返回受影响行数
    pub async fn reset_visit_count_in_tx(tx: &mut PgConnection, vehicle_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE vehicle_stats
            SET current_visit_count = 0, updated_at = NOW()
            WHERE vehicle_id = $1
            "#,
        )
        .bind(vehicle_id)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// 事务内累计获得优惠数加一
    pub async fn increment_offers_earned_in_tx(
        tx: &mut PgConnection,
        vehicle_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used)
            VALUES ($1, 0, 0, 1, 0)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET total_offers_earned = vehicle_stats.total_offers_earned + 1,
                updated_at = NOW()
            "#,
        )
        .bind(vehicle_id)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 事务内累计使用优惠数加一
    pub async fn increment_offers_used_in_tx(
        tx: &mut PgConnection,
        vehicle_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_stats
                (vehicle_id, total_visits, current_visit_count, total_offers_earned,
                 total_offers_used)
            VALUES ($1, 0, 0, 0, 1)
            ON CONFLICT (vehicle_id) DO UPDATE
            SET total_offers_used = vehicle_stats.total_offers_used + 1,
                updated_at = NOW()
            "#,
        )
        .bind(vehicle_id)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl VehicleStatsRepositoryTrait for VehicleStatsRepository {
    async fn get_stats(&self, vehicle_id: i64) -> Result<Option<VehicleStats>> {
        self.get_stats(vehicle_id).await
    }

    async fn record_visit(
        &self,
        vehicle_id: i64,
        visited_at: DateTime<Utc>,
    ) -> Result<VehicleStats> {
        self.record_visit(vehicle_id, visited_at).await
    }

    async fn reset_visit_count(&self, vehicle_id: i64) -> Result<u64> {
        self.reset_visit_count(vehicle_id).await
    }

    async fn increment_offers_earned(&self, vehicle_id: i64) -> Result<()> {
        self.increment_offers_earned(vehicle_id).await
    }

    async fn increment_offers_used(&self, vehicle_id: i64) -> Result<()> {
        self.increment_offers_used(vehicle_id).await
    }

    async fn initialize(&self, vehicle_id: i64) -> Result<VehicleStats> {
        self.initialize(vehicle_id).await
    }

    async fn adjust(
        &self,
        vehicle_id: i64,
        total_visits: Option<i32>,
        current_visit_count: Option<i32>,
        total_offers_earned: Option<i32>,
        total_offers_used: Option<i32>,
    ) -> Result<u64> {
        self.adjust(
            vehicle_id,
            total_visits,
            current_visit_count,
            total_offers_earned,
            total_offers_used,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    // 计数语义依赖 ON CONFLICT DO UPDATE 的原子性
    // 并发与幂等行为由 tests/ 下的集成测试覆盖

    #[test]
    fn test_repository_creation() {
        // 仅验证类型定义正确，不实际连接数据库
    }
}
