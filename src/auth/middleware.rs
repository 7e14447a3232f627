//! JWT 认证中间件

use crate::{
    auth::jwt::TokenType,
    error::AppError,
    middleware::AppState,
    models::user::{Role, User},
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "Could not validate credentials";

/// 认证身份（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
}

impl AuthUser {
    /// Fails with `AccountDisabled` for an inactive account
    pub fn require_active(&self) -> Result<(), AppError> {
        if self.is_active {
            Ok(())
        } else {
            Err(AppError::AccountDisabled)
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.id, role = %self.role, required = %role, "Role check failed");
            Err(AppError::Forbidden)
        }
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role,
            is_active: user.is_active,
        }
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthUser
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthenticated("Not authenticated"))
    }
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthenticated("Not authenticated"))
}

/// 认证中间件 - 必须认证
///
/// Bearer token, access-token decode, blacklist check by jti, then user
/// lookup. Any failure rejects the request as unauthenticated.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(req.headers())?;

    let claims = state
        .codec
        .decode(&token, TokenType::Access)
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AppError::Unauthenticated(INVALID_CREDENTIALS)
        })?;

    if state.token_store.is_blacklisted(&claims.jti).await {
        tracing::debug!(jti = %claims.jti, "Blacklisted token presented");
        return Err(AppError::Unauthenticated("Token has been revoked"));
    }

    let user_id = claims
        .user_id()
        .map_err(|_| AppError::Unauthenticated(INVALID_CREDENTIALS))?;

    let user = state
        .auth_service
        .find_user(user_id)
        .await?
        .ok_or(AppError::Unauthenticated(INVALID_CREDENTIALS))?;

    req.extensions_mut().insert(AuthUser::from(&user));

    Ok(next.run(req).await)
}

fn auth_user(req: &Request) -> Result<&AuthUser, AppError> {
    req.extensions()
        .get::<AuthUser>()
        .ok_or(AppError::Unauthenticated("Not authenticated"))
}

/// 要求账户处于启用状态（需在 auth_middleware 之后）
pub async fn require_active(req: Request, next: Next) -> Result<Response, AppError> {
    auth_user(&req)?.require_active()?;
    Ok(next.run(req).await)
}

/// 要求管理员角色（需在 auth_middleware 之后）
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    auth_user(&req)?.require_role(Role::Admin)?;
    Ok(next.run(req).await)
}
