// src/fetch/retry.rs

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use super::Transport;

/// Statuses worth another attempt; everything else non-2xx fails at once.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// GET `url` and return the body, retrying network errors and retryable
/// statuses with a doubling delay.
pub async fn get_text_with_retry<T: Transport>(
    transport: &T,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String> {
    let mut attempt = 0;
    let mut delay = policy.initial_delay;
    loop {
        attempt += 1;
        let failure = match transport.get(url).await {
            Ok(resp) if resp.is_success() => return Ok(resp.body),
            Ok(resp) if RETRYABLE_STATUSES.contains(&resp.status) => {
                anyhow!("GET {} returned HTTP {}", url, resp.status)
            }
            Ok(resp) => bail!("GET {} returned HTTP {}", url, resp.status),
            Err(e) => e,
        };

        if attempt >= policy.max_attempts {
            error!(%url, attempts = attempt, error = %failure, "Exhausted retries");
            return Err(failure.context(format!("giving up on {} after {} attempts", url, attempt)));
        }
        warn!(%url, attempt, delay_ms = delay.as_millis() as u64, error = %failure, "Retrying");
        sleep(delay).await;
        delay *= 2;
    }
}
