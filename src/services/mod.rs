pub mod auth_service;
pub mod token_store;

pub use auth_service::AuthService;
pub use token_store::TokenStore;

use crate::error::AppError;
use std::{future::Future, time::Duration};

/// Bound a storage call; an elapsed deadline becomes `StorageUnavailable`
pub(crate) async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                operation = op,
                timeout_ms = timeout.as_millis() as u64,
                "Storage call timed out"
            );
            Err(AppError::StorageUnavailable(format!("{} timed out", op)))
        }
    }
}
