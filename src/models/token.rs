//! Persisted token records

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Stored refresh token. Only the keyed digest of the raw value is kept.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl RefreshToken {
    /// Not revoked and not yet expired at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expires_at > now
    }
}

/// Revoked access token id, kept until the token would have expired anyway
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlacklistEntry {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Rows removed by one purge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub refresh_tokens: u64,
    pub blacklisted_tokens: u64,
}
