use super::cdp_client::{PageDriver, WaitCondition};
use crate::run::RunLog;
use std::time::Duration;

/// How hard to try a single page transition.
#[derive(Debug, Clone)]
pub struct NavOptions {
    pub wait: WaitCondition,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay after failed attempt `i` is `i * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for NavOptions {
    fn default() -> Self {
        Self {
            wait: WaitCondition::DomContentLoaded,
            timeout: Duration::from_secs(90),
            max_attempts: 2,
            backoff_step: Duration::from_secs(1),
        }
    }
}

/// Navigates with bounded retries and linear backoff.
///
/// Returns `false` once every attempt failed; callers skip the target then.
pub async fn goto_with_retry(page: &dyn PageDriver, url: &str, options: &NavOptions, log: &RunLog) -> bool {
    let attempts = options.max_attempts.max(1);
    for attempt in 1..=attempts {
        match page.goto(url, options.wait, options.timeout).await {
            Ok(()) => return true,
            Err(e) => {
                log.log(format!("Navigation failed ({}/{}) {}: {}", attempt, attempts, url, e));
                if attempt < attempts {
                    tokio::time::sleep(options.backoff_step * attempt).await;
                }
            }
        }
    }
    false
}
