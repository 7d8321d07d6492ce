use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::ports::RepositoryResult;

/// Runs a Record Store call under a deadline.
///
/// Expiry maps to the retryable `AppError::Timeout`, never to a definitive outcome.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = RepositoryResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Record store call timed out");
            Err(AppError::Timeout(format!(
                "{} exceeded {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
