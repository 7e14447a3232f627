//! Database repository layer
//!
//! The traits below are the persistence contract the auth core depends on.
//! `PgUserRepository` / `PgTokenRepository` back them with PostgreSQL,
//! `MemoryStore` keeps everything in-process.

pub mod memory;
pub mod token_repo;
pub mod user_repo;

pub use memory::MemoryStore;
pub use token_repo::PgTokenRepository;
pub use user_repo::PgUserRepository;

use crate::{
    error::AppError,
    models::{
        token::{BlacklistEntry, PurgeReport, RefreshToken},
        user::{NewUser, User, UserUpdate},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// User table access
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; uniqueness violations surface as `DuplicateEmail` / `DuplicateUsername`
    async fn create(&self, new_user: &NewUser) -> Result<User, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_last_login(&self, id: Uuid) -> Result<(), AppError>;

    /// Returns false when no such user exists
    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError>;

    /// Apply the present fields of `update`; `None` when no such user exists
    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<Option<User>, AppError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    async fn count_active(&self) -> Result<i64, AppError>;
}

/// Refresh-token and blacklist table access
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Non-revoked, non-expired record with this digest
    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, AppError>;

    /// Record with this digest in any state, revoked or expired included
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, AppError>;

    /// Non-revoked, non-expired records of one user, newest first
    async fn list_active_refresh_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError>;

    /// Revoke `old_id` and insert `replacement` as one unit.
    ///
    /// Returns false, inserting nothing, when `old_id` was already revoked.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError>;

    /// Returns true when this call flipped the flag
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, AppError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// No-op when the jti is already present
    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<(), AppError>;

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError>;

    /// Delete expired refresh tokens and blacklist entries in one transaction
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}
