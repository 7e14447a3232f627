//! Authentication and authorization module

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, TokenCodec, TokenType};
pub use middleware::{auth_middleware, extract_token, require_active, require_admin, AuthUser};
pub use password::PasswordHasher;
