use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Fixed-wait, bounded-attempt retry for transient I/O against the queue and
/// the vector index.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Retry succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!("All {} retry attempts exhausted", self.max_attempts);
                    return Err(error);
                }
                Err(error) => {
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, self.wait
                    );
                    sleep(self.wait).await;
                }
            }
        }
    }
}
