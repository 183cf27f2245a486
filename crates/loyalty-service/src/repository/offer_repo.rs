//! 优惠定义仓储
//!
//! 提供优惠目录的数据访问

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use super::traits::OfferRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    DiscountType, Offer,
    offer::{NewOffer, OfferPatch},
};

/// 优惠定义仓储
///
/// 负责 offers 表的数据访问，名称唯一性由数据库唯一约束兜底
pub struct OfferRepository {
    pool: PgPool,
}

impl OfferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询 ====================

    /// 获取单个优惠定义
    pub async fn get_offer(&self, id: i64) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(
            r#"
            SELECT id, name, description, visit_threshold, discount_type, discount_value,
                   is_active, valid_from, valid_until, created_at, updated_at
            FROM offers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    /// 检查名称是否已被占用
    ///
    /// exclude_id 用于更新场景排除自身
    pub async fn name_exists(&self, name: &str, exclude_id: Option<i64>) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM offers
                WHERE name = $1 AND ($2::bigint IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    /// 列出指定日期可参与发放评估的优惠
    ///
    /// 仅返回启用且落在有效期窗口内的定义，按门槛从低到高
    pub async fn list_issuable(&self, as_of: NaiveDate) -> Result<Vec<Offer>> {
        let offers = sqlx::query_as::<_, Offer>(
            r#"
            SELECT id, name, description, visit_threshold, discount_type, discount_value,
                   is_active, valid_from, valid_until, created_at, updated_at
            FROM offers
            WHERE is_active = true
              AND (valid_from IS NULL OR valid_from <= $1)
              AND (valid_until IS NULL OR valid_until >= $1)
            ORDER BY visit_threshold ASC, id ASC
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(offers)
    }

    /// 分页查询优惠定义
    #[allow(clippy::too_many_arguments)]
    pub async fn list_offers(
        &self,
        is_active: Option<bool>,
        discount_type: Option<DiscountType>,
        min_threshold: Option<i32>,
        max_threshold: Option<i32>,
        name_keyword: Option<String>,
        valid_on: Option<NaiveDate>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Offer>, i64)> {
        let keyword_pattern = name_keyword.map(|k| format!("%{}%", k));

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM offers
            WHERE ($1::boolean IS NULL OR is_active = $1)
              AND ($2::varchar IS NULL OR discount_type = $2)
              AND ($3::int IS NULL OR visit_threshold >= $3)
              AND ($4::int IS NULL OR visit_threshold <= $4)
              AND ($5::text IS NULL OR name ILIKE $5)
              AND ($6::date IS NULL OR
                   ((valid_from IS NULL OR valid_from <= $6)
                    AND (valid_until IS NULL OR valid_until >= $6)))
            "#,
        )
        .bind(is_active)
        .bind(discount_type)
        .bind(min_threshold)
        .bind(max_threshold)
        .bind(&keyword_pattern)
        .bind(valid_on)
        .fetch_one(&self.pool)
        .await?;

        let offers = sqlx::query_as::<_, Offer>(
            r#"
            SELECT id, name, description, visit_threshold, discount_type, discount_value,
                   is_active, valid_from, valid_until, created_at, updated_at
            FROM offers
            WHERE ($1::boolean IS NULL OR is_active = $1)
              AND ($2::varchar IS NULL OR discount_type = $2)
              AND ($3::int IS NULL OR visit_threshold >= $3)
              AND ($4::int IS NULL OR visit_threshold <= $4)
              AND ($5::text IS NULL OR name ILIKE $5)
              AND ($6::date IS NULL OR
                   ((valid_from IS NULL OR valid_from <= $6)
                    AND (valid_until IS NULL OR valid_until >= $6)))
            ORDER BY visit_threshold ASC, id ASC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(is_active)
        .bind(discount_type)
        .bind(min_threshold)
        .bind(max_threshold)
        .bind(&keyword_pattern)
        .bind(valid_on)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((offers, total))
    }

    // ==================== 写入 ====================

    /// 创建优惠定义，返回新行 ID
    pub async fn create_offer(&self, offer: &NewOffer) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO offers (name, description, visit_threshold, discount_type,
                                discount_value, is_active, valid_from, valid_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&offer.name)
        .bind(&offer.description)
        .bind(offer.visit_threshold)
        .bind(offer.discount_type)
        .bind(offer.discount_value)
        .bind(offer.is_active)
        .bind(offer.valid_from)
        .bind(offer.valid_until)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.constraint() == Some("offers_name_key") => {
                LoyaltyError::DuplicateOfferName(offer.name.clone())
            }
            other => other.into(),
        })?;

        Ok(id)
    }

    /// 部分更新优惠定义，返回受影响行数
    pub async fn update_offer(&self, id: i64, patch: &OfferPatch) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                visit_threshold = COALESCE($4, visit_threshold),
                discount_type = COALESCE($5, discount_type),
                discount_value = COALESCE($6, discount_value),
                is_active = COALESCE($7, is_active),
                valid_from = COALESCE($8, valid_from),
                valid_until = COALESCE($9, valid_until),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(patch.visit_threshold)
        .bind(patch.discount_type)
        .bind(patch.discount_value)
        .bind(patch.is_active)
        .bind(patch.valid_from)
        .bind(patch.valid_until)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.constraint() == Some("offers_name_key") => {
                LoyaltyError::DuplicateOfferName(patch.name.clone().unwrap_or_default())
            }
            other => other.into(),
        })?;

        Ok(result.rows_affected())
    }

    /// 删除优惠定义，返回受影响行数
    ///
    /// 是否允许删除（有无已发放实例）由服务层检查
    pub async fn delete_offer(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM offers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// 批量启用或停用，返回受影响行数
    ///
    /// 已处于目标状态的行重复设置无副作用
    pub async fn bulk_set_active(&self, ids: &[i64], is_active: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE offers
            SET is_active = $2, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OfferRepositoryTrait for OfferRepository {
    async fn get_offer(&self, id: i64) -> Result<Option<Offer>> {
        self.get_offer(id).await
    }

    async fn name_exists(&self, name: &str, exclude_id: Option<i64>) -> Result<bool> {
        self.name_exists(name, exclude_id).await
    }

    async fn create_offer(&self, offer: &NewOffer) -> Result<i64> {
        self.create_offer(offer).await
    }

    async fn update_offer(&self, id: i64, patch: &OfferPatch) -> Result<u64> {
        self.update_offer(id, patch).await
    }

    async fn delete_offer(&self, id: i64) -> Result<u64> {
        self.delete_offer(id).await
    }

    async fn list_issuable(&self, as_of: NaiveDate) -> Result<Vec<Offer>> {
        self.list_issuable(as_of).await
    }

    async fn list_offers(
        &self,
        is_active: Option<bool>,
        discount_type: Option<DiscountType>,
        min_threshold: Option<i32>,
        max_threshold: Option<i32>,
        name_keyword: Option<String>,
        valid_on: Option<NaiveDate>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Offer>, i64)> {
        self.list_offers(
            is_active,
            discount_type,
            min_threshold,
            max_threshold,
            name_keyword,
            valid_on,
            limit,
            offset,
        )
        .await
    }

    async fn bulk_set_active(&self, ids: &[i64], is_active: bool) -> Result<u64> {
        self.bulk_set_active(ids, is_active).await
    }
}

#[cfg(test)]
mod tests {
    // 仓储方法均为运行时 SQL，依赖真实数据库
    // 完整行为由 tests/ 下的集成测试覆盖

    #[test]
    fn test_repository_creation() {
        // 仅验证类型定义正确，不实际连接数据库
        // let pool = PgPool::connect_lazy("postgres://test").unwrap();
        // let repo = OfferRepository::new(pool);
        // 在集成测试中使用
    }
}
