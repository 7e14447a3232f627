//! 认证相关的 HTTP 处理器

use crate::{
    auth::{extract_token, AuthUser},
    error::AppError,
    middleware::{client_info, AppState},
    models::{
        auth::{
            LoginRequest, MessageResponse, RefreshTokenRequest, RefreshTokenResponse,
            RegisterRequest, SessionResponse,
        },
        user::UserResponse,
    },
};
use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};

/// 注册
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_info(&headers, state.config.security.trust_proxy);
    let response = state.auth_service.register(req, &client).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// 登录
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_info(&headers, state.config.security.trust_proxy);
    let response = state.auth_service.login(req, &client).await?;

    Ok(Json(response))
}

/// 刷新令牌
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_info(&headers, state.config.security.trust_proxy);
    let tokens = state
        .auth_service
        .refresh(&req.refresh_token, &client)
        .await?;

    Ok(Json(RefreshTokenResponse::from(tokens)))
}

/// 登出
pub async fn logout(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = extract_token(&headers)?;
    state.auth_service.logout(&token).await?;

    Ok(Json(MessageResponse::new("Successfully logged out")))
}

/// 获取当前用户信息
pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.get_user(user.id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// 当前用户的有效会话
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions: Vec<SessionResponse> = state
        .auth_service
        .list_sessions(user.id)
        .await?
        .into_iter()
        .map(SessionResponse::from)
        .collect();

    Ok(Json(sessions))
}
