use crate::core::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded retry with exponential backoff for transient network faults.
/// Waits `base_delay * 2^attempt` between attempts (2s, 4s with the
/// defaults), no jitter. Non-transient errors pass through untouched.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` up to `max_attempts` times. The closure receives the
    /// zero-based attempt index so callers can widen timeouts on retry.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt + 1 >= self.max_attempts {
                        return Err(ApiError::NetworkExhausted {
                            attempts: self.max_attempts,
                            cause: err.to_string(),
                        });
                    }
                    // 指数退避：2s, 4s, 8s...
                    let wait = self.base_delay * 2u32.pow(attempt + 1);
                    warn!(
                        "瞬时网络错误（第 {} 次尝试）: {}，{}s 后重试",
                        attempt + 1,
                        err,
                        wait.as_secs()
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
