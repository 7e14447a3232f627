//! Token persistence policy
//!
//! Refresh tokens are indexed by an HMAC-SHA256 digest of the raw value, so a
//! lookup is a single keyed query and a leaked table cannot be replayed.
//! Every storage call is bounded by a timeout and surfaces as
//! `StorageUnavailable` when it elapses.

use crate::{
    error::AppError,
    models::{
        auth::ClientInfo,
        token::{BlacklistEntry, PurgeReport, RefreshToken},
    },
    repository::TokenRepository,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{future::Future, sync::Arc, time::Duration};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    digest_key: Vec<u8>,
    timeout: Duration,
}

impl TokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>, digest_key: &str, timeout: Duration) -> Self {
        Self {
            repo,
            digest_key: digest_key.as_bytes().to_vec(),
            timeout,
        }
    }

    /// Keyed digest of a raw refresh token, hex encoded
    pub fn digest(&self, raw_token: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.digest_key)
            .unwrap_or_else(|_| unreachable!("HMAC can take key of any size"));
        mac.update(raw_token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        super::bounded(self.timeout, op, fut).await
    }

    fn record(
        &self,
        user_id: Uuid,
        raw_token: &str,
        expires_at: DateTime<Utc>,
        client: &ClientInfo,
    ) -> RefreshToken {
        RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: self.digest(raw_token),
            expires_at,
            is_revoked: false,
            created_at: Utc::now(),
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
        }
    }

    /// 存储刷新令牌（仅保存摘要）
    pub async fn save_refresh_token(
        &self,
        user_id: Uuid,
        raw_token: &str,
        expires_at: DateTime<Utc>,
        client: &ClientInfo,
    ) -> Result<Uuid, AppError> {
        let record = self.record(user_id, raw_token, expires_at, client);
        self.bounded("save_refresh_token", self.repo.insert_refresh_token(&record))
            .await?;

        tracing::debug!(token_id = %record.id, user_id = %user_id, "Refresh token stored");
        Ok(record.id)
    }

    /// 查找与原始令牌匹配的有效记录
    pub async fn find_active_refresh_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        let digest = self.digest(raw_token);
        self.bounded(
            "find_active_refresh_token",
            self.repo.find_active_refresh_token(&digest, Utc::now()),
        )
        .await
    }

    /// 查找与原始令牌匹配的记录，不论状态
    pub async fn find_refresh_token(&self, raw_token: &str) -> Result<Option<RefreshToken>, AppError> {
        let digest = self.digest(raw_token);
        self.bounded("find_refresh_token", self.repo.find_refresh_token(&digest))
            .await
    }

    /// Replace `old_id` with a freshly stored token in one unit.
    ///
    /// `Ok(None)` means another request already consumed `old_id`.
    pub async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        user_id: Uuid,
        raw_token: &str,
        expires_at: DateTime<Utc>,
        client: &ClientInfo,
    ) -> Result<Option<Uuid>, AppError> {
        let record = self.record(user_id, raw_token, expires_at, client);
        let rotated = self
            .bounded(
                "rotate_refresh_token",
                self.repo.rotate_refresh_token(old_id, &record),
            )
            .await?;

        Ok(rotated.then_some(record.id))
    }

    pub async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        self.bounded(
            "list_active_sessions",
            self.repo.list_active_refresh_tokens(user_id, Utc::now()),
        )
        .await
    }

    /// 撤销刷新令牌（幂等）
    pub async fn revoke(&self, token_id: Uuid) -> Result<(), AppError> {
        let changed = self
            .bounded("revoke_refresh_token", self.repo.revoke_refresh_token(token_id))
            .await?;
        tracing::debug!(token_id = %token_id, changed, "Refresh token revoked");
        Ok(())
    }

    /// 撤销用户的所有刷新令牌
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.bounded("revoke_all_for_user", self.repo.revoke_all_for_user(user_id))
            .await
    }

    /// 加入黑名单（幂等）
    pub async fn blacklist(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        let entry = BlacklistEntry {
            jti: jti.to_string(),
            expires_at,
        };
        self.bounded("blacklist", self.repo.insert_blacklist_entry(&entry))
            .await
    }

    /// 黑名单检查；存储异常时视为已拉黑
    pub async fn is_blacklisted(&self, jti: &str) -> bool {
        match self.bounded("is_blacklisted", self.repo.is_blacklisted(jti)).await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::error!(error = %e, "Blacklist lookup failed, treating token as revoked");
                metrics::counter!("auth_blacklist_lookup_failures_total").increment(1);
                true
            }
        }
    }

    /// 清理过期令牌
    pub async fn purge_expired(&self) -> Result<PurgeReport, AppError> {
        let report = self
            .bounded("purge_expired", self.repo.purge_expired(Utc::now()))
            .await?;

        tracing::info!(
            refresh_tokens = report.refresh_tokens,
            blacklisted_tokens = report.blacklisted_tokens,
            "Expired tokens purged"
        );
        Ok(report)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.bounded("ping", self.repo.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    const KEY: &str = "refresh_digest_key_32_characters_long";

    fn store() -> (Arc<MemoryStore>, TokenStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = TokenStore::new(memory.clone(), KEY, Duration::from_secs(1));
        (memory, store)
    }

    #[test]
    fn test_digest_is_keyed_and_deterministic() {
        let (_, a) = store();
        let b = TokenStore::new(
            Arc::new(MemoryStore::new()),
            "another_digest_key_32_characters_long",
            Duration::from_secs(1),
        );

        assert_eq!(a.digest("raw"), a.digest("raw"));
        assert_ne!(a.digest("raw"), a.digest("raw2"));
        assert_ne!(a.digest("raw"), b.digest("raw"));
        assert_eq!(a.digest("raw").len(), 64);
    }

    #[tokio::test]
    async fn test_raw_token_is_never_stored() {
        let (memory, store) = store();
        let user_id = Uuid::new_v4();
        let expires = Utc::now() + ChronoDuration::days(7);

        store
            .save_refresh_token(user_id, "raw-secret", expires, &ClientInfo::default())
            .await
            .unwrap();

        let records = memory.refresh_tokens().await;
        assert_eq!(records.len(), 1);
        assert_ne!(records[0].token_hash, "raw-secret");
        assert!(!records[0].token_hash.contains("raw-secret"));
    }

    #[tokio::test]
    async fn test_multiple_sessions_per_user() {
        let (_, store) = store();
        let user_id = Uuid::new_v4();
        let expires = Utc::now() + ChronoDuration::days(7);
        let client = ClientInfo {
            user_agent: Some("curl/8".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
        };

        store.save_refresh_token(user_id, "one", expires, &client).await.unwrap();
        store.save_refresh_token(user_id, "two", expires, &client).await.unwrap();

        let sessions = store.list_active_sessions(user_id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].user_agent.as_deref(), Some("curl/8"));

        assert_eq!(store.revoke_all_for_user(user_id).await.unwrap(), 2);
        assert!(store.find_active_refresh_token("one").await.unwrap().is_none());
        assert!(store.find_active_refresh_token("two").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (_, store) = store();
        let id = store
            .save_refresh_token(
                Uuid::new_v4(),
                "raw",
                Utc::now() + ChronoDuration::days(1),
                &ClientInfo::default(),
            )
            .await
            .unwrap();

        store.revoke(id).await.unwrap();
        store.revoke(id).await.unwrap();
        assert!(store.find_active_refresh_token("raw").await.unwrap().is_none());

        let revoked = store.find_refresh_token("raw").await.unwrap().unwrap();
        assert_eq!(revoked.id, id);
        assert!(revoked.is_revoked);
        assert!(store.find_refresh_token("never-issued").await.unwrap().is_none());
    }

    /// Repository whose every call fails
    struct BrokenRepo;

    #[async_trait]
    impl TokenRepository for BrokenRepo {
        async fn insert_refresh_token(&self, _: &RefreshToken) -> Result<(), AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn find_active_refresh_token(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<Option<RefreshToken>, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn find_refresh_token(&self, _: &str) -> Result<Option<RefreshToken>, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn list_active_refresh_tokens(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> Result<Vec<RefreshToken>, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn rotate_refresh_token(&self, _: Uuid, _: &RefreshToken) -> Result<bool, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn revoke_refresh_token(&self, _: Uuid) -> Result<bool, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn revoke_all_for_user(&self, _: Uuid) -> Result<u64, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn insert_blacklist_entry(&self, _: &BlacklistEntry) -> Result<(), AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn is_blacklisted(&self, _: &str) -> Result<bool, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn purge_expired(&self, _: DateTime<Utc>) -> Result<PurgeReport, AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
        async fn ping(&self) -> Result<(), AppError> {
            Err(AppError::StorageUnavailable("down".into()))
        }
    }

    /// Repository whose blacklist lookup never returns
    struct HangingRepo(MemoryStore);

    #[async_trait]
    impl TokenRepository for HangingRepo {
        async fn insert_refresh_token(&self, t: &RefreshToken) -> Result<(), AppError> {
            self.0.insert_refresh_token(t).await
        }
        async fn find_active_refresh_token(
            &self,
            h: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<RefreshToken>, AppError> {
            self.0.find_active_refresh_token(h, now).await
        }
        async fn find_refresh_token(&self, h: &str) -> Result<Option<RefreshToken>, AppError> {
            self.0.find_refresh_token(h).await
        }
        async fn list_active_refresh_tokens(
            &self,
            u: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Vec<RefreshToken>, AppError> {
            self.0.list_active_refresh_tokens(u, now).await
        }
        async fn rotate_refresh_token(&self, id: Uuid, t: &RefreshToken) -> Result<bool, AppError> {
            self.0.rotate_refresh_token(id, t).await
        }
        async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, AppError> {
            self.0.revoke_refresh_token(id).await
        }
        async fn revoke_all_for_user(&self, u: Uuid) -> Result<u64, AppError> {
            self.0.revoke_all_for_user(u).await
        }
        async fn insert_blacklist_entry(&self, e: &BlacklistEntry) -> Result<(), AppError> {
            self.0.insert_blacklist_entry(e).await
        }
        async fn is_blacklisted(&self, _: &str) -> Result<bool, AppError> {
            std::future::pending::<Result<bool, AppError>>().await
        }
        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            self.0.purge_expired(now).await
        }
        async fn ping(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blacklist_check_fails_closed() {
        let store = TokenStore::new(Arc::new(BrokenRepo), KEY, Duration::from_secs(1));
        assert!(store.is_blacklisted("any-jti").await);
    }

    #[tokio::test]
    async fn test_slow_storage_surfaces_as_unavailable() {
        let store = TokenStore::new(
            Arc::new(HangingRepo(MemoryStore::new())),
            KEY,
            Duration::from_millis(20),
        );

        assert!(store.is_blacklisted("any-jti").await);
        assert!(matches!(
            store.purge_expired().await,
            Err(AppError::StorageUnavailable(_))
        ));
    }
}
