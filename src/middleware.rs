//! HTTP 中间件
//! 应用状态、请求追踪、客户端信息提取

use crate::{
    auth::{jwt::TokenCodec, password::PasswordHasher},
    config::AppConfig,
    error::AppError,
    models::auth::ClientInfo,
    repository::{TokenRepository, UserRepository},
    services::{AuthService, TokenStore},
};
use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::Instrument;
use uuid::Uuid;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// 当前请求的 request_id（仅在请求追踪中间件内可用）
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// 在给定 request_id 下运行 `fut`
pub(crate) async fn with_request_id<F: Future>(request_id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(request_id, fut).await
}

/// 应用状态
///
/// 服务以 Arc 共享，Clone 只复制指针。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub auth_service: Arc<AuthService>,
    pub token_store: Arc<TokenStore>,
    pub codec: Arc<TokenCodec>,
}

impl AppState {
    /// Wire the auth core on top of the given storage backends
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenRepository>,
    ) -> Result<Self, AppError> {
        let timeout = Duration::from_millis(config.database.statement_timeout_ms);

        let codec = Arc::new(TokenCodec::from_config(&config.security)?);
        let hasher = Arc::new(PasswordHasher::from_config(&config.security)?);
        let token_store = Arc::new(TokenStore::new(
            tokens,
            config.security.refresh_digest_key(),
            timeout,
        ));

        let auth_service = Arc::new(AuthService::new(
            users,
            token_store.clone(),
            codec.clone(),
            hasher,
            config.security.clone(),
            timeout,
        ));

        Ok(Self {
            config,
            auth_service,
            token_store,
            codec,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        let start = Instant::now();

        let mut response = with_request_id(request_id.clone(), next.run(req)).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        // 指标标签只使用静态字符串
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "OTHER",
        };
        let status_class = match status {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 获取客户端 IP 地址
pub fn get_client_ip(headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        // X-Forwarded-For 可能包含多个 IP，取第一个
        if let Some(first_ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first_ip.to_string();
        }

        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return real_ip.trim().to_string();
        }
    }

    "unknown".to_string()
}

/// 提取刷新令牌记录所需的请求元数据
pub fn client_info(headers: &HeaderMap, trust_proxy: bool) -> ClientInfo {
    ClientInfo {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        ip_address: Some(get_client_ip(headers, trust_proxy)),
    }
}
