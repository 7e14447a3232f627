//! 认证服务：注册、登录、令牌刷新、登出

use crate::{
    auth::{jwt::TokenCodec, password::PasswordHasher},
    config::SecurityConfig,
    error::AppError,
    models::{
        auth::{ClientInfo, LoginRequest, LoginResponse, RegisterRequest, TokenResponse},
        token::RefreshToken,
        user::{NewUser, Role, User, UserListResponse, UserResponse, UserStats, UserUpdate},
    },
    repository::UserRepository,
    services::{bounded, TokenStore},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;
use validator::Validate;

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenStore>,
    codec: Arc<TokenCodec>,
    hasher: Arc<PasswordHasher>,
    security: SecurityConfig,
    timeout: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<TokenStore>,
        codec: Arc<TokenCodec>,
        hasher: Arc<PasswordHasher>,
        security: SecurityConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            codec,
            hasher,
            security,
            timeout,
        }
    }

    /// 用户注册
    pub async fn register(
        &self,
        req: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, AppError> {
        req.validate()?;
        PasswordHasher::validate_password_policy(&req.password, &self.security)?;

        let password_hash = self.hash_password(req.password).await?;

        let new_user = NewUser {
            email: req.email,
            username: req.username,
            password_hash,
            first_name: req.first_name,
            last_name: req.last_name,
        };

        let mut user = bounded(self.timeout, "create_user", self.users.create(&new_user)).await?;

        let tokens = self.open_session(&mut user, client).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");

        Ok(LoginResponse {
            user: UserResponse::from(user),
            tokens,
        })
    }

    /// 用户登录
    pub async fn login(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginResponse, AppError> {
        req.validate()?;

        let user = bounded(
            self.timeout,
            "find_user_by_email",
            self.users.find_by_email(&req.email),
        )
        .await?;

        let mut user = match user {
            Some(user) => user,
            None => {
                // 未找到用户时仍消耗一次校验，使响应时间一致
                self.burn_verification(req.password).await;
                return Err(self.login_failure("invalid_credentials", AppError::InvalidCredentials));
            }
        };

        if self.security.check_password_before_status {
            if !self.verify_password(req.password, &user.password_hash).await? {
                return Err(self.login_failure("invalid_credentials", AppError::InvalidCredentials));
            }
            if !user.is_active {
                return Err(self.login_failure("account_disabled", AppError::AccountDisabled));
            }
        } else {
            // 账户状态先于密码校验
            if !user.is_active {
                return Err(self.login_failure("account_disabled", AppError::AccountDisabled));
            }
            if !self.verify_password(req.password, &user.password_hash).await? {
                return Err(self.login_failure("invalid_credentials", AppError::InvalidCredentials));
            }
        }

        let tokens = self.open_session(&mut user, client).await?;

        metrics::counter!("auth_login_total", "outcome" => "success").increment(1);
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(LoginResponse {
            user: UserResponse::from(user),
            tokens,
        })
    }

    /// 刷新令牌（单次使用，轮换）
    pub async fn refresh(
        &self,
        raw_refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<TokenResponse, AppError> {
        let record = match self.tokens.find_active_refresh_token(raw_refresh_token).await? {
            Some(record) => record,
            None if self.owner_is_disabled(raw_refresh_token).await? => {
                return Err(self.refresh_failure("account_disabled", AppError::AccountDisabled));
            }
            None => return Err(self.refresh_failure("invalid", AppError::InvalidRefreshToken)),
        };

        let user = bounded(
            self.timeout,
            "find_user_by_id",
            self.users.find_by_id(record.user_id),
        )
        .await?;

        let user = match user {
            Some(user) if user.is_active => user,
            Some(user) => {
                self.tokens.revoke(record.id).await?;
                tracing::warn!(user_id = %user.id, "Refresh rejected for disabled account");
                return Err(self.refresh_failure("account_disabled", AppError::AccountDisabled));
            }
            None => {
                self.tokens.revoke(record.id).await?;
                return Err(self.refresh_failure("invalid", AppError::InvalidRefreshToken));
            }
        };

        let access_token = self.codec.issue_access_token(&user.id)?;
        let refresh_token = self.codec.issue_refresh_token();

        let rotated = self
            .tokens
            .rotate_refresh_token(
                record.id,
                user.id,
                &refresh_token,
                self.codec.refresh_token_expiry(),
                client,
            )
            .await?;

        let Some(new_id) = rotated else {
            // 并发刷新中已有请求消费了该令牌
            tracing::warn!(token_id = %record.id, "Refresh token reused");
            return Err(self.refresh_failure("reused", AppError::InvalidRefreshToken));
        };

        metrics::counter!("auth_refresh_total", "outcome" => "success").increment(1);
        tracing::debug!(user_id = %user.id, old = %record.id, new = %new_id, "Refresh token rotated");

        Ok(self.token_response(access_token, refresh_token))
    }

    /// 用户登出
    ///
    /// Decoding is best effort: a token that no longer verifies leaves nothing
    /// to invalidate and the call still succeeds. Otherwise the jti is
    /// blacklisted until the token's own expiry and every refresh session of
    /// the user is revoked.
    pub async fn logout(&self, access_token: &str) -> Result<(), AppError> {
        let claims = match self.codec.decode_ignoring_expiry(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Logout with undecodable token");
                return Ok(());
            }
        };

        self.tokens.blacklist(&claims.jti, claims.expires_at()).await?;

        let revoked = match claims.user_id() {
            Ok(user_id) => self.tokens.revoke_all_for_user(user_id).await?,
            Err(_) => 0,
        };

        metrics::counter!("auth_logout_total").increment(1);
        tracing::info!(sub = %claims.sub, revoked_sessions = revoked, "User logged out");

        Ok(())
    }

    /// 当前用户的有效会话
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        self.tokens.list_active_sessions(user_id).await
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        bounded(self.timeout, "find_user_by_id", self.users.find_by_id(id)).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.find_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// 管理员：用户列表
    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<UserListResponse, AppError> {
        if !(1..=100).contains(&limit) {
            return Err(AppError::validation("limit must be between 1 and 100"));
        }
        if offset < 0 {
            return Err(AppError::validation("offset must not be negative"));
        }

        let users = bounded(self.timeout, "list_users", self.users.list(limit, offset)).await?;
        let total = bounded(self.timeout, "count_users", self.users.count()).await?;

        Ok(UserListResponse {
            users: users.into_iter().map(UserResponse::from).collect(),
            total,
            limit,
            offset,
        })
    }

    /// 管理员：启用 / 禁用账户
    ///
    /// Disabling revokes every refresh session of the account, so a later
    /// reactivation requires a fresh login.
    pub async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<User, AppError> {
        let found = bounded(
            self.timeout,
            "set_user_active",
            self.users.set_active(id, is_active),
        )
        .await?;

        if !found {
            return Err(AppError::not_found("User not found"));
        }

        let revoked = if is_active {
            0
        } else {
            self.tokens.revoke_all_for_user(id).await?
        };

        tracing::info!(user_id = %id, is_active, revoked_sessions = revoked, "Account status changed");

        self.get_user(id).await
    }

    /// 管理员：更新用户资料、角色与验证状态
    pub async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User, AppError> {
        update.validate()?;

        if update.is_empty() {
            return self.get_user(id).await;
        }

        let user = bounded(self.timeout, "update_user", self.users.update(id, &update))
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        tracing::info!(user_id = %id, role = %user.role, is_verified = user.is_verified, "User updated");

        Ok(user)
    }

    /// 将已注册账户提升为管理员；账户不存在时返回 `None`
    pub async fn ensure_admin(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = bounded(self.timeout, "find_user_by_email", self.users.find_by_email(email)).await?;

        match user {
            Some(user) if user.role == Role::Admin => Ok(Some(user)),
            Some(user) => {
                let promote = UserUpdate {
                    role: Some(Role::Admin),
                    ..Default::default()
                };
                let promoted = bounded(self.timeout, "update_user", self.users.update(user.id, &promote))
                    .await?;
                tracing::info!(user_id = %user.id, "Account promoted to admin");
                Ok(promoted)
            }
            None => Ok(None),
        }
    }

    /// 管理员：账户统计
    pub async fn user_stats(&self) -> Result<UserStats, AppError> {
        let total_users = bounded(self.timeout, "count_users", self.users.count()).await?;
        let active_users =
            bounded(self.timeout, "count_active_users", self.users.count_active()).await?;

        Ok(UserStats {
            total_users,
            active_users,
        })
    }

    // ==================== helpers ====================

    /// 签发令牌对、存储刷新令牌并更新最后登录时间
    async fn open_session(
        &self,
        user: &mut User,
        client: &ClientInfo,
    ) -> Result<TokenResponse, AppError> {
        let access_token = self.codec.issue_access_token(&user.id)?;
        let refresh_token = self.codec.issue_refresh_token();

        self.tokens
            .save_refresh_token(user.id, &refresh_token, self.codec.refresh_token_expiry(), client)
            .await?;

        bounded(
            self.timeout,
            "update_last_login",
            self.users.update_last_login(user.id),
        )
        .await?;
        user.last_login = Some(Utc::now());

        Ok(self.token_response(access_token, refresh_token))
    }

    /// 令牌已失效时，判断其所属账户是否被禁用
    async fn owner_is_disabled(&self, raw_refresh_token: &str) -> Result<bool, AppError> {
        let Some(record) = self.tokens.find_refresh_token(raw_refresh_token).await? else {
            return Ok(false);
        };

        let owner = bounded(
            self.timeout,
            "find_user_by_id",
            self.users.find_by_id(record.user_id),
        )
        .await?;

        Ok(owner.is_some_and(|user| !user.is_active))
    }

    fn token_response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.codec.access_token_exp_secs(),
        }
    }

    async fn hash_password(&self, password: String) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, password: String, hash: &str) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))
    }

    async fn burn_verification(&self, password: String) {
        let hasher = self.hasher.clone();
        let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await;
    }

    fn login_failure(&self, outcome: &'static str, err: AppError) -> AppError {
        metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
        tracing::debug!(outcome, "Login rejected");
        err
    }

    fn refresh_failure(&self, outcome: &'static str, err: AppError) -> AppError {
        metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
        err
    }
}
