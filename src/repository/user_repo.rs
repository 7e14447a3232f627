//! User repository (数据库访问层)

use super::UserRepository;
use crate::{
    error::AppError,
    models::user::{NewUser, User, UserUpdate},
};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, username, password_hash, first_name, last_name, \
     role, is_active, is_verified, created_at, updated_at, last_login";

pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    /// 创建用户
    async fn create(&self, new_user: &NewUser) -> Result<User, AppError> {
        let query = format!(
            r#"
            INSERT INTO users (email, username, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(&new_user.email)
            .bind(&new_user.username)
            .bind(&new_user.password_hash)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .fetch_one(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 根据 ID 查找用户
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 根据邮箱查找用户
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");

        sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 更新最后登录时间
    async fn update_last_login(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(AppError::from_db)?;

        Ok(())
    }

    /// 启用 / 禁用账户
    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(is_active)
                .execute(&self.db)
                .await
                .map_err(AppError::from_db)?;

        Ok(result.rows_affected() > 0)
    }

    /// 管理员更新用户资料
    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<Option<User>, AppError> {
        let query = format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                role = COALESCE($4, role),
                is_verified = COALESCE($5, is_verified),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(update.role.map(|r| r.as_str()))
            .bind(update.is_verified)
            .fetch_optional(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 列出所有用户
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );

        sqlx::query_as::<_, User>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await
            .map_err(AppError::from_db)
    }

    /// 统计用户数量
    async fn count(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .map_err(AppError::from_db)?
            .get(0);

        Ok(count)
    }

    /// 统计启用的用户数量
    async fn count_active(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users WHERE is_active = TRUE")
            .fetch_one(&self.db)
            .await
            .map_err(AppError::from_db)?
            .get(0);

        Ok(count)
    }
}
