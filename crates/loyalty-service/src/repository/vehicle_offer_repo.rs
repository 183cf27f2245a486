//! 车辆优惠仓储
//!
//! 提供 vehicle_offers 表的数据访问。同一车辆同一优惠最多一条 active
//! 记录由部分唯一索引 uq_vehicle_offers_active 保证，发放路径依赖
//! ON CONFLICT 与约束冲突映射，不依赖先查后插

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;

use super::traits::VehicleOfferRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{VehicleOffer, VehicleOfferStatus};

/// 自动过期扫描的候选行
#[derive(sqlx::FromRow)]
struct StaleOffer {
    id: i64,
    offer_id: i64,
    valid_until: NaiveDate,
}

/// 车辆优惠仓储
pub struct VehicleOfferRepository {
    pool: PgPool,
}

impl VehicleOfferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询 ====================

    /// 获取单条车辆优惠
    pub async fn get_vehicle_offer(&self, id: i64) -> Result<Option<VehicleOffer>> {
        let vehicle_offer = sqlx::query_as::<_, VehicleOffer>(
            r#"
            SELECT id, vehicle_id, offer_id, earned_on_visit_id, issued_date, status,
                   used_date, used_on_visit_id, notes, created_at, updated_at
            FROM vehicle_offers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vehicle_offer)
    }

    /// 检查车辆是否已持有某优惠的 active 记录
    pub async fn has_active_offer(&self, vehicle_id: i64, offer_id: i64) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM vehicle_offers
                WHERE vehicle_id = $1 AND offer_id = $2 AND status = 'active'
            )
            "#,
        )
        .bind(vehicle_id)
        .bind(offer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    /// 列出车辆当前持有的全部 active 优惠
    pub async fn list_active_for_vehicle(&self, vehicle_id: i64) -> Result<Vec<VehicleOffer>> {
        let vehicle_offers = sqlx::query_as::<_, VehicleOffer>(
            r#"
            SELECT id, vehicle_id, offer_id, earned_on_visit_id, issued_date, status,
                   used_date, used_on_visit_id, notes, created_at, updated_at
            FROM vehicle_offers
            WHERE vehicle_id = $1 AND status = 'active'
            ORDER BY issued_date ASC, id ASC
            "#,
        )
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(vehicle_offers)
    }

    /// 某优惠定义名下已发放的实例总数
    pub async fn count_for_offer(&self, offer_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_offers WHERE offer_id = $1")
                .bind(offer_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// 分页查询发放记录
    #[allow(clippy::too_many_arguments)]
    pub async fn list_vehicle_offers(
        &self,
        vehicle_id: Option<i64>,
        offer_id: Option<i64>,
        status: Option<VehicleOfferStatus>,
        issued_from: Option<DateTime<Utc>>,
        issued_to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<VehicleOffer>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM vehicle_offers
            WHERE ($1::bigint IS NULL OR vehicle_id = $1)
              AND ($2::bigint IS NULL OR offer_id = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR issued_date >= $4)
              AND ($5::timestamptz IS NULL OR issued_date <= $5)
            "#,
        )
        .bind(vehicle_id)
        .bind(offer_id)
        .bind(status)
        .bind(issued_from)
        .bind(issued_to)
        .fetch_one(&self.pool)
        .await?;

        let vehicle_offers = sqlx::query_as::<_, VehicleOffer>(
            r#"
            SELECT id, vehicle_id, offer_id, earned_on_visit_id, issued_date, status,
                   used_date, used_on_visit_id, notes, created_at, updated_at
            FROM vehicle_offers
            WHERE ($1::bigint IS NULL OR vehicle_id = $1)
              AND ($2::bigint IS NULL OR offer_id = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR issued_date >= $4)
              AND ($5::timestamptz IS NULL OR issued_date <= $5)
            ORDER BY issued_date DESC, id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(vehicle_id)
        .bind(offer_id)
        .bind(status)
        .bind(issued_from)
        .bind(issued_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((vehicle_offers, total))
    }

    // ==================== 写入 ====================

    /// 批量过期指定记录，仅 active 行受影响，返回受影响行数
    ///
    /// 已终态的记录自然跳过，重复调用无副作用
    pub async fn bulk_expire(&self, ids: &[i64], notes: Option<String>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE vehicle_offers
            SET status = 'expired', notes = COALESCE($2, notes), updated_at = NOW()
            WHERE id = ANY($1) AND status = 'active'
            "#,
        )
        .bind(ids)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 删除发放记录，返回受影响行数
    pub async fn delete_vehicle_offer(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vehicle_offers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// 扫描并过期一批已超出有效期窗口的 active 优惠，返回本批过期数
    ///
    /// 使用 FOR UPDATE SKIP LOCKED 锁定候选行，多实例同时扫描不会重复处理。
    /// 备注统一写入所属优惠的失效日期
    pub async fn expire_stale_batch(&self, as_of: NaiveDate, batch_size: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let stale = sqlx::query_as::<_, StaleOffer>(
            r#"
            SELECT vo.id, vo.offer_id, o.valid_until
            FROM vehicle_offers vo
            JOIN offers o ON o.id = vo.offer_id
            WHERE vo.status = 'active'
              AND o.valid_until IS NOT NULL
              AND o.valid_until < $1
            ORDER BY o.valid_until ASC, vo.id ASC
            FOR UPDATE OF vo SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(as_of)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if stale.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        for row in &stale {
            sqlx::query(
                r#"
                UPDATE vehicle_offers
                SET status = 'expired', notes = $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(row.id)
            .bind(format!("优惠有效期至 {}，系统自动过期", row.valid_until))
            .execute(&mut *tx)
            .await?;

            info!(
                vehicle_offer_id = row.id,
                offer_id = row.offer_id,
                valid_until = %row.valid_until,
                "车辆优惠已自动过期"
            );
        }

        tx.commit().await?;

        Ok(stale.len() as u64)
    }

    // ==================== 事务内操作 ====================

    /// 事务内发放优惠，已有 active 记录时静默跳过
    ///
    /// 依赖部分唯一索引做冲突仲裁，返回 None 表示该车辆已持有此优惠
    pub async fn insert_active_if_absent_in_tx(
        tx: &mut PgConnection,
        vehicle_id: i64,
        offer_id: i64,
        earned_on_visit_id: Option<i64>,
        issued_date: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<Option<VehicleOffer>> {
        let vehicle_offer = sqlx::query_as::<_, VehicleOffer>(
            r#"
            INSERT INTO vehicle_offers
                (vehicle_id, offer_id, earned_on_visit_id, issued_date, status, notes)
            VALUES ($1, $2, $3, $4, 'active', $5)
            ON CONFLICT (vehicle_id, offer_id) WHERE status = 'active' DO NOTHING
            RETURNING id, vehicle_id, offer_id, earned_on_visit_id, issued_date, status,
                      used_date, used_on_visit_id, notes, created_at, updated_at
            "#,
        )
        .bind(vehicle_id)
        .bind(offer_id)
        .bind(earned_on_visit_id)
        .bind(issued_date)
        .bind(notes)
        .fetch_optional(tx)
        .await?;

        Ok(vehicle_offer)
    }

    /// 事务内发放优惠，已有 active 记录时报冲突错误
    pub async fn insert_active_in_tx(
        tx: &mut PgConnection,
        vehicle_id: i64,
        offer_id: i64,
        earned_on_visit_id: Option<i64>,
        issued_date: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<VehicleOffer> {
        let vehicle_offer = sqlx::query_as::<_, VehicleOffer>(
            r#"
            INSERT INTO vehicle_offers
                (vehicle_id, offer_id, earned_on_visit_id, issued_date, status, notes)
            VALUES ($1, $2, $3, $4, 'active', $5)
            RETURNING id, vehicle_id, offer_id, earned_on_visit_id, issued_date, status,
                      used_date, used_on_visit_id, notes, created_at, updated_at
            "#,
        )
        .bind(vehicle_id)
        .bind(offer_id)
        .bind(earned_on_visit_id)
        .bind(issued_date)
        .bind(notes)
        .fetch_one(tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db)
                if db.constraint() == Some("uq_vehicle_offers_active") =>
            {
                LoyaltyError::DuplicateActiveOffer {
                    vehicle_id,
                    offer_id,
                }
            }
            other => other.into(),
        })?;

        Ok(vehicle_offer)
    }

    /// 事务内核销，仅 active 可核销，返回受影响行数
    ///
    /// 0 表示记录不处于 active 状态，由调用方决定报错语义
    pub async fn mark_used_in_tx(
        tx: &mut PgConnection,
        id: i64,
        used_date: DateTime<Utc>,
        used_on_visit_id: i64,
        notes: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE vehicle_offers
            SET status = 'used', used_date = $2, used_on_visit_id = $3,
                notes = COALESCE($4, notes), updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(used_date)
        .bind(used_on_visit_id)
        .bind(notes)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// 事务内手工过期单条记录，仅 active 可过期，返回受影响行数
    pub async fn mark_expired_in_tx(
        tx: &mut PgConnection,
        id: i64,
        notes: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE vehicle_offers
            SET status = 'expired', notes = COALESCE($2, notes), updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(notes)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VehicleOfferRepositoryTrait for VehicleOfferRepository {
    async fn get_vehicle_offer(&self, id: i64) -> Result<Option<VehicleOffer>> {
        self.get_vehicle_offer(id).await
    }

    async fn has_active_offer(&self, vehicle_id: i64, offer_id: i64) -> Result<bool> {
        self.has_active_offer(vehicle_id, offer_id).await
    }

    async fn list_active_for_vehicle(&self, vehicle_id: i64) -> Result<Vec<VehicleOffer>> {
        self.list_active_for_vehicle(vehicle_id).await
    }

    async fn count_for_offer(&self, offer_id: i64) -> Result<i64> {
        self.count_for_offer(offer_id).await
    }

    async fn list_vehicle_offers(
        &self,
        vehicle_id: Option<i64>,
        offer_id: Option<i64>,
        status: Option<VehicleOfferStatus>,
        issued_from: Option<DateTime<Utc>>,
        issued_to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<VehicleOffer>, i64)> {
        self.list_vehicle_offers(
            vehicle_id,
            offer_id,
            status,
            issued_from,
            issued_to,
            limit,
            offset,
        )
        .await
    }

    async fn bulk_expire(&self, ids: &[i64], notes: Option<String>) -> Result<u64> {
        self.bulk_expire(ids, notes).await
    }

    async fn delete_vehicle_offer(&self, id: i64) -> Result<u64> {
        self.delete_vehicle_offer(id).await
    }

    async fn expire_stale_batch(&self, as_of: NaiveDate, batch_size: i64) -> Result<u64> {
        self.expire_stale_batch(as_of, batch_size).await
    }
}

#[cfg(test)]
mod tests {
    // 发放的并发语义依赖部分唯一索引与 ON CONFLICT
    // 相关行为由 tests/ 下的集成测试覆盖

    #[test]
    fn test_repository_creation() {
        // 仅验证类型定义正确，不实际连接数据库
    }
}
