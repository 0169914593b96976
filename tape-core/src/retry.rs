use std::fmt::Display;
use tracing::warn;

/// Retry an async operation with linear backoff.
///
/// Calls `f` up to `max_attempts` times (at least once). On failure, waits
/// 500ms * attempt before retrying. Returns the first success or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(max_attempts: u32, label: &str, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    label, attempt, max_attempts, e
                );
                tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed after {} attempts", label, max_attempts);
                return Err(e);
            }
        }
    }
}
