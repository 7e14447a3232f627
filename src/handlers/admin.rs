//! 管理员 HTTP 处理器

use crate::{
    auth::AuthUser,
    error::AppError,
    middleware::AppState,
    models::user::{ListUsersQuery, Role, UserResponse, UserUpdate},
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// 列出用户
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .auth_service
        .list_users(query.limit, query.offset)
        .await?;

    Ok(Json(page))
}

/// 获取用户详情
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.get_user(id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// 更新用户资料、角色与验证状态
pub async fn update_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<UserUpdate>,
) -> Result<impl IntoResponse, AppError> {
    if admin.id == id && update.role.is_some_and(|role| role != Role::Admin) {
        return Err(AppError::validation("Administrators cannot change their own role"));
    }

    let user = state.auth_service.update_user(id, update).await?;
    tracing::info!(admin_id = %admin.id, user_id = %id, "User updated by admin");

    Ok(Json(UserResponse::from(user)))
}

/// 启用账户
pub async fn activate_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.set_user_active(id, true).await?;
    tracing::info!(admin_id = %admin.id, user_id = %id, "Account activated by admin");

    Ok(Json(UserResponse::from(user)))
}

/// 禁用账户
pub async fn deactivate_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if admin.id == id {
        return Err(AppError::validation("Administrators cannot deactivate themselves"));
    }

    let user = state.auth_service.set_user_active(id, false).await?;
    tracing::info!(admin_id = %admin.id, user_id = %id, "Account deactivated by admin");

    Ok(Json(UserResponse::from(user)))
}

/// 账户统计
pub async fn get_admin_stats(
    State(state): State<AppState>,
    admin: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.auth_service.user_stats().await?;

    Ok(Json(json!({
        "stats": stats,
        "admin_user": {
            "id": admin.id,
            "email": admin.email,
            "role": admin.role,
        }
    })))
}

/// 清理过期令牌
pub async fn cleanup_expired_tokens(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.token_store.purge_expired().await?;
    Ok(Json(report))
}
