//! In-process storage backend
//!
//! All tables sit behind a single lock, so every operation is serialized and
//! reads always observe the latest write.

use super::{TokenRepository, UserRepository};
use crate::{
    error::AppError,
    models::{
        token::{BlacklistEntry, PurgeReport, RefreshToken},
        user::{NewUser, Role, User, UserUpdate},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    blacklisted_tokens: HashMap<String, BlacklistEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored refresh-token record
    pub async fn refresh_tokens(&self) -> Vec<RefreshToken> {
        self.tables.read().await.refresh_tokens.values().cloned().collect()
    }

    /// Snapshot of every blacklist entry
    pub async fn blacklist(&self) -> Vec<BlacklistEntry> {
        self.tables
            .read()
            .await
            .blacklisted_tokens
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, new_user: &NewUser) -> Result<User, AppError> {
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|u| u.email == new_user.email) {
            return Err(AppError::DuplicateEmail);
        }
        if tables.users.values().any(|u| u.username == new_user.username) {
            return Err(AppError::DuplicateUsername);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
            username: new_user.username.clone(),
            password_hash: new_user.password_hash.clone(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            role: Role::User,
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_active = is_active;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<Option<User>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(first_name) = &update.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_verified) = update.is_verified {
            user.is_verified = is_verified;
        }
        user.updated_at = Utc::now();

        Ok(Some(user.clone()))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, AppError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.tables.read().await.users.len() as i64)
    }

    async fn count_active(&self) -> Result<i64, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|u| u.is_active)
            .count() as i64)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;

        if tables
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == token.token_hash)
        {
            return Err(AppError::internal_error("refresh token digest collision"));
        }

        tables.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash && t.is_active_at(now))
            .cloned())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshToken>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn list_active_refresh_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError> {
        let tables = self.tables.read().await;
        let mut tokens: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id && t.is_active_at(now))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(tokens)
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;

        match tables.refresh_tokens.get_mut(&old_id) {
            Some(old) if !old.is_revoked => old.is_revoked = true,
            _ => return Ok(false),
        }

        tables
            .refresh_tokens
            .insert(replacement.id, replacement.clone());
        Ok(true)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(&id) {
            Some(token) if !token.is_revoked => {
                token.is_revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let mut revoked = 0;
        for token in tables
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.is_revoked)
        {
            token.is_revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> Result<(), AppError> {
        self.tables
            .write()
            .await
            .blacklisted_tokens
            .entry(entry.jti.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError> {
        Ok(self.tables.read().await.blacklisted_tokens.contains_key(jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError> {
        let mut tables = self.tables.write().await;

        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| t.expires_at >= now);
        let refresh_tokens = (before - tables.refresh_tokens.len()) as u64;

        let before = tables.blacklisted_tokens.len();
        tables.blacklisted_tokens.retain(|_, e| e.expires_at >= now);
        let blacklisted_tokens = (before - tables.blacklisted_tokens.len()) as u64;

        Ok(PurgeReport {
            refresh_tokens,
            blacklisted_tokens,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
