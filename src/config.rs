//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:8000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
    /// 请求体大小上限（字节）
    pub request_body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
    /// 单次存储调用的超时时间（毫秒），超时视为存储不可用
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 签名密钥（必填，无默认值）
    pub jwt_secret: Secret<String>,
    /// JWT 签名算法，仅允许 HMAC 系列
    pub jwt_algorithm: String,
    /// 访问令牌过期时间（分钟）
    pub access_token_exp_minutes: u64,
    /// 刷新令牌过期时间（天）
    pub refresh_token_exp_days: u64,
    /// 刷新令牌摘要密钥（可选，缺省时复用 jwt_secret）
    #[serde(default)]
    pub refresh_token_secret: Option<Secret<String>>,
    /// Argon2 内存开销（KiB）
    pub password_hash_memory_kib: u32,
    /// Argon2 迭代次数
    pub password_hash_iterations: u32,
    /// Argon2 并行度
    pub password_hash_parallelism: u32,
    /// 密码最小长度
    pub password_min_length: usize,
    /// 登录时先校验密码再检查账户状态
    pub check_password_before_status: bool,
    /// 是否信任 X-Forwarded-For 头
    pub trust_proxy: bool,
    /// 过期令牌清理间隔（秒），0 表示关闭
    pub purge_interval_secs: u64,
    /// 启动时授予管理员角色的已注册账户
    #[serde(default)]
    pub bootstrap_admin_email: Option<String>,
}

impl SecurityConfig {
    /// 解析签名算法
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        match self.jwt_algorithm.to_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            other => Err(ConfigError::Message(format!(
                "Unsupported JWT algorithm: {}. Must be one of: HS256, HS384, HS512",
                other
            ))),
        }
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.access_token_exp_minutes * 60
    }

    pub fn refresh_token_exp_secs(&self) -> u64 {
        self.refresh_token_exp_days * 24 * 60 * 60
    }

    /// 刷新令牌摘要使用的密钥
    pub fn refresh_digest_key(&self) -> &str {
        self.refresh_token_secret
            .as_ref()
            .unwrap_or(&self.jwt_secret)
            .expose_secret()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置（jwt_secret 与 database.url 必须由环境提供）
        settings = settings
            .set_default("server.addr", "0.0.0.0:8000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("server.request_body_limit_bytes", 1024 * 1024)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 5)?
            .set_default("database.acquire_timeout_secs", 60)?
            .set_default("database.idle_timeout_secs", 300)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("database.statement_timeout_ms", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_algorithm", "HS256")?
            .set_default("security.access_token_exp_minutes", 30)?
            .set_default("security.refresh_token_exp_days", 7)?
            .set_default("security.password_hash_memory_kib", 19456)?
            .set_default("security.password_hash_iterations", 2)?
            .set_default("security.password_hash_parallelism", 1)?
            .set_default("security.password_min_length", 8)?
            .set_default("security.check_password_before_status", false)?
            .set_default("security.trust_proxy", true)?
            .set_default("security.purge_interval_secs", 3600)?;

        // 从环境变量加载配置（前缀为 AUTH_）
        settings = settings.add_source(
            Environment::with_prefix("AUTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围（0 表示随机端口）
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if let Some(secret) = &self.security.refresh_token_secret {
            if secret.expose_secret().len() < 32 {
                return Err(ConfigError::Message(
                    "refresh_token_secret must be at least 32 characters long".to_string(),
                ));
            }
        }

        self.security.algorithm()?;

        // 验证令牌过期时间
        if !(1..=1440).contains(&self.security.access_token_exp_minutes) {
            return Err(ConfigError::Message(
                "access_token_exp_minutes must be between 1 and 1440 (1 minute to 24 hours)"
                    .to_string(),
            ));
        }

        if !(1..=90).contains(&self.security.refresh_token_exp_days) {
            return Err(ConfigError::Message(
                "refresh_token_exp_days must be between 1 and 90".to_string(),
            ));
        }

        // 验证密码策略
        if self.security.password_min_length < 6 || self.security.password_min_length > 128 {
            return Err(ConfigError::Message(
                "password_min_length must be between 6 and 128".to_string(),
            ));
        }

        // 验证 Argon2 参数
        argon2::Params::new(
            self.security.password_hash_memory_kib,
            self.security.password_hash_iterations,
            self.security.password_hash_parallelism,
            None,
        )
        .map_err(|e| ConfigError::Message(format!("Invalid password hash parameters: {}", e)))?;

        Ok(())
    }
}
