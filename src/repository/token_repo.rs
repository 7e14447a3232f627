//! Refresh-token and blacklist repository (认证数据访问)

use super::TokenRepository;
use crate::{
    error::AppError,
    models::token::{BlacklistEntry, PurgeReport, RefreshToken},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

const REFRESH_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, is_revoked, created_at, user_agent, ip_address";

pub struct PgTokenRepository {
    db: PgPool,
}

impl PgTokenRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_with<'e, E>(executor: E, token: &RefreshToken) -> Result<(), AppError>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, user_id, token_hash, expires_at, is_revoked, created_at, user_agent, ip_address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.is_revoked)
        .bind(token.created_at)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .execute(executor)
        .await
        .map_err(AppError::from_db)?;

        Ok(())
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    // ==================== Refresh Tokens ====================

    /// 存储刷新令牌
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        Self::insert_with(&self.db, token).await
    }

    /// 根据摘要查找有效的刷新令牌
    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, AppError> {
        let query = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE token_hash = $1 AND is_revoked = false AND expires_at > $2"
        );

        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 按摘要查找记录（含已撤销、已过期）
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, AppError> {
        let query = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");

        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 列出用户的有效会话
    async fn list_active_refresh_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError> {
        let query = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE user_id = $1 AND is_revoked = false AND expires_at > $2 \
             ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 令牌轮换：撤销旧令牌并写入新令牌（同一事务）
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::from_db)?;

        // 行锁保证并发刷新时只有一个请求能完成撤销
        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true WHERE id = $1 AND is_revoked = false",
        )
        .bind(old_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from_db)?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await.map_err(AppError::from_db)?;
            return Ok(false);
        }

        Self::insert_with(&mut *tx, replacement).await?;
        tx.commit().await.map_err(AppError::from_db)?;

        Ok(true)
    }

    /// 撤销刷新令牌
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true WHERE id = $1 AND is_revoked = false",
        )
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(AppError::from_db)?;

        Ok(result.rows_affected() > 0)
    }

    /// 撤销用户的所有刷新令牌
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true WHERE user_id = $1 AND is_revoked = false",
        )
        .bind(user_id)
        .execute(&self.db)
        .await
        .map_err(AppError::from_db)?;

        Ok(result.rows_affected())
    }

    // ==================== Blacklist ====================

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO blacklisted_tokens (jti, expires_at, blacklisted_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(&entry.jti)
        .bind(entry.expires_at)
        .execute(&self.db)
        .await
        .map_err(AppError::from_db)?;

        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blacklisted_tokens WHERE jti = $1)")
                .bind(jti)
                .fetch_one(&self.db)
                .await
                .map_err(AppError::from_db)?;

        Ok(exists)
    }

    // ==================== Maintenance ====================

    /// 清理过期的刷新令牌和黑名单条目
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::from_db)?;

        let refresh_tokens = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_db)?
            .rows_affected();

        let blacklisted_tokens = sqlx::query("DELETE FROM blacklisted_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_db)?
            .rows_affected();

        tx.commit().await.map_err(AppError::from_db)?;

        Ok(PurgeReport {
            refresh_tokens,
            blacklisted_tokens,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.db)
            .await
            .map_err(AppError::from_db)?;

        Ok(())
    }
}
