//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Username already taken")]
    DuplicateUsername,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Unexpected token type: expected {expected}")]
    WrongTokenType { expected: &'static str },

    #[error("Authentication required: {0}")]
    Unauthenticated(&'static str),

    #[error("Access denied")]
    Forbidden,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::AccountDisabled
            | AppError::InvalidRefreshToken
            | AppError::ExpiredToken
            | AppError::MalformedToken
            | AppError::WrongTokenType { .. }
            | AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::DuplicateEmail | AppError::DuplicateUsername => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    ///
    /// 令牌解码的各类失败统一为同一条消息，不暴露具体是哪一项检查失败。
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::AccountDisabled => "Account is disabled".to_string(),
            AppError::DuplicateEmail => "Email already registered".to_string(),
            AppError::DuplicateUsername => "Username already taken".to_string(),
            AppError::InvalidRefreshToken => "Invalid refresh token".to_string(),
            AppError::ExpiredToken
            | AppError::MalformedToken
            | AppError::WrongTokenType { .. } => "Could not validate credentials".to_string(),
            AppError::Unauthenticated(reason) => reason.to_string(),
            AppError::Forbidden => "Not enough permissions".to_string(),
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::Validation(msg) => msg.clone(),
            AppError::StorageUnavailable(_) => "Service temporarily unavailable".to_string(),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 是否属于服务端故障
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }

    // 便捷方法
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    /// 将数据库错误翻译为领域错误
    ///
    /// 唯一约束冲突按约束名映射为重复邮箱 / 重复用户名。
    /// 其他约束冲突仍按数据库故障处理。
    pub fn from_db(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some(name) if name.contains("email") => return AppError::DuplicateEmail,
                    Some(name) if name.contains("username") => return AppError::DuplicateUsername,
                    _ => {}
                }
            }
        }

        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::StorageUnavailable(e.to_string())
            }
            other => AppError::Database(other),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = crate::middleware::current_request_id()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 服务端故障记录完整上下文，客户端错误仅调试级别
        if self.is_server_fault() {
            tracing::error!(
                code = self.code(),
                error = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                error = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        let mut response = (status, Json(error_response)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
