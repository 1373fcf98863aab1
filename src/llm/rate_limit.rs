//! Request spacing per provider and transparent retry on rate-limit errors.

use crate::config::LlmProvider;
use crate::error::Result;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

static LIMITERS: LazyLock<Mutex<HashMap<LlmProvider, Arc<RateLimiter>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static TRY_AGAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:try again|retry) (?:in|after) (\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|sec|seconds?|m|min|minutes?)?")
        .expect("Invalid regex")
});
static STATUS_429: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b429\b").expect("Invalid regex"));
static RETRY_DELAY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?retry_?delay"?\s*[:=]\s*"?(\d+(?:\.\d+)?)\s*(ms|s)?"#).expect("Invalid regex")
});

/// Spaces requests evenly at a fixed requests-per-minute rate.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter. Zero disables spacing.
    pub fn new(requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / requests_per_minute as f64)
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// The process-wide limiter for a provider, created on first use.
    pub fn for_provider(provider: LlmProvider, requests_per_minute: u32) -> Arc<RateLimiter> {
        let mut limiters = LIMITERS.lock().unwrap_or_else(|e| e.into_inner());
        limiters
            .entry(provider)
            .or_insert_with(|| Arc::new(RateLimiter::new(requests_per_minute)))
            .clone()
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Whether a provider error message describes a rate limit or exhausted quota.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("ratelimit")
        || lower.contains("resource_exhausted")
        || lower.contains("resourceexhausted")
        || lower.contains("too many requests")
        || STATUS_429.is_match(&lower)
}

/// Extract a retry delay from a provider message.
pub fn parse_retry_delay(message: &str) -> Option<Duration> {
    if let Some(caps) = TRY_AGAIN.captures(message) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let secs = if unit.starts_with("ms") || unit.starts_with("milli") {
            value / 1000.0
        } else if unit.starts_with('m') {
            value * 60.0
        } else {
            value
        };
        return Some(Duration::from_secs_f64(secs));
    }
    if let Some(caps) = RETRY_DELAY_FIELD.captures(message) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let secs = match caps.get(2).map(|m| m.as_str()) {
            Some("ms") => value / 1000.0,
            _ => value,
        };
        return Some(Duration::from_secs_f64(secs));
    }
    None
}

/// A random delay between 10 and 60 seconds.
pub fn random_backoff() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(10..=60))
}

/// Run `op`, retrying rate-limit errors after the parsed (or random) delay.
pub async fn retry_rate_limited<T, F, Fut>(tag: &str, max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_rate_limit() && attempt < max_retries => {
                attempt += 1;
                let delay = e.retry_delay().unwrap_or_else(random_backoff);
                warn!(
                    "{}: rate limited (attempt {}/{}), retrying in {:.1}s",
                    tag,
                    attempt,
                    max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PanelistError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_retry_delay() {
        assert_eq!(
            parse_retry_delay("Please try again in 7.5s."),
            Some(Duration::from_millis(7500))
        );
        assert_eq!(
            parse_retry_delay("Retry after 12 seconds"),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            parse_retry_delay("try again in 250ms"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_retry_delay(r#"{"@type": "RetryInfo", "retryDelay": "30s"}"#),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_delay("quota exceeded"), None);
    }

    #[test]
    fn test_rate_limit_messages() {
        assert!(is_rate_limit_message("429 Too Many Requests"));
        assert!(is_rate_limit_message("RESOURCE_EXHAUSTED: quota"));
        assert!(!is_rate_limit_message("invalid api key"));
        assert!(is_rate_limit_message("status 429: slow down"));
        assert!(!is_rate_limit_message("context of 14290 tokens exceeded"));
        assert!(!is_rate_limit_message("request id 4291"));
    }

    #[test]
    fn test_random_backoff_range() {
        for _ in 0..20 {
            let delay = random_backoff();
            assert!(delay >= Duration::from_secs(10) && delay <= Duration::from_secs(60));
        }
    }

    #[tokio::test]
    async fn test_retry_uses_parsed_delay() {
        let calls = AtomicU32::new(0);
        let result = retry_rate_limited("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PanelistError::RateLimited {
                        message: "try again in 5ms".to_string(),
                        retry_after: Some(Duration::from_millis(5)),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        let result = tokio_test::assert_ok!(result);
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_rate_limited("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PanelistError::Llm("bad request".to_string())) }
        })
        .await;
        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_limiter_spaces_requests() {
        let limiter = RateLimiter::new(1200); // 50ms interval
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(95));
    }
}
