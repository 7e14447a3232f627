//! JWT token generation and validation
//! Access tokens are signed JWTs; refresh tokens are opaque random strings

use crate::{config::SecurityConfig, error::AppError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bytes of entropy in an opaque refresh token
const REFRESH_TOKEN_BYTES: usize = 32;

/// Token type claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Token type (access or refresh)
    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::MalformedToken)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// Signs and verifies tokens with a fixed HMAC algorithm
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_token_exp_secs: u64,
    refresh_token_exp_secs: u64,
}

impl TokenCodec {
    pub fn new(
        secret: &str,
        algorithm: Algorithm,
        access_token_exp_secs: u64,
        refresh_token_exp_secs: u64,
    ) -> Result<Self, AppError> {
        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AppError::Config(format!(
                "Unsupported JWT algorithm {:?}",
                algorithm
            )));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            access_token_exp_secs,
            refresh_token_exp_secs,
        })
    }

    /// Create codec from config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        Self::new(
            config.jwt_secret.expose_secret(),
            config.algorithm()?,
            config.access_token_exp_secs(),
            config.refresh_token_exp_secs(),
        )
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.access_token_exp_secs
    }

    /// Expiry for a refresh token issued now
    pub fn refresh_token_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.refresh_token_exp_secs as i64)
    }

    /// Generate access token
    pub fn issue_access_token(&self, subject: &Uuid) -> Result<String, AppError> {
        self.issue_token(
            subject,
            TokenType::Access,
            Duration::seconds(self.access_token_exp_secs as i64),
        )
    }

    /// Sign a token of the given type with an explicit lifetime
    pub fn issue_token(
        &self,
        subject: &Uuid,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now();

        let claims = Claims {
            sub: subject.to_string(),
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", token_type, e);
            AppError::Internal(format!("Failed to encode {} token: {}", token_type, e))
        })
    }

    /// Generate an opaque refresh token
    pub fn issue_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Verify signature, expiry and token type
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let claims = self.decode_with(token, self.validation(true))?;

        if claims.token_type != expected {
            tracing::debug!(
                "Token type mismatch: expected '{}', got '{}'",
                expected,
                claims.token_type
            );
            return Err(AppError::WrongTokenType {
                expected: expected.as_str(),
            });
        }

        Ok(claims)
    }

    /// Verify signature only; expired tokens are accepted
    ///
    /// Used where the caller wants to invalidate state named by a token
    /// rather than authorize with it.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Result<Claims, AppError> {
        self.decode_with(token, self.validation(false))
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        // Only the configured algorithm is accepted; the header's alg is never trusted
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }

    fn decode_with(&self, token: &str, validation: Validation) -> Result<Claims, AppError> {
        decode::<Claims>(token.trim(), &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                    _ => AppError::MalformedToken,
                }
            })
    }
}
