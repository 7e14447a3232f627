//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    auth::{auth_middleware, require_active, require_admin},
    handlers,
    middleware::{request_tracking_middleware, AppState},
};

/// 创建应用路由
pub fn create_router(state: AppState) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 认证路由（无需认证）
    let auth_routes = Router::new()
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh_token));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // 需要认证且账户启用
    let active_routes = Router::new()
        .route("/api/v1/auth/sessions", get(handlers::auth::list_sessions))
        .route_layer(from_fn(require_active))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // 管理员路由
    let admin_routes = Router::new()
        .route("/api/v1/admin/users", get(handlers::admin::list_users))
        .route(
            "/api/v1/admin/users/{id}",
            get(handlers::admin::get_user).put(handlers::admin::update_user),
        )
        .route(
            "/api/v1/admin/users/{id}/activate",
            post(handlers::admin::activate_user),
        )
        .route(
            "/api/v1/admin/users/{id}/deactivate",
            post(handlers::admin::deactivate_user),
        )
        .route("/api/v1/admin/stats", get(handlers::admin::get_admin_stats))
        .route(
            "/api/v1/admin/cleanup",
            post(handlers::admin::cleanup_expired_tokens),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn(require_active))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let body_limit = state.config.server.request_body_limit_bytes;

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(active_routes)
        .merge(admin_routes)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_tracking_middleware))
        .with_state(state)
}
