use std::{future::Future, time::Duration};

use inflow_utils::config::FetchConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base... capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The provider refused the block span, a narrower range may work.
    RangeTooWide,
    /// Rate limits, server errors, timeouts. Worth another attempt.
    Transient,
    Fatal,
}

fn mentions_range_limit(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("response size exceeded")
        || message.contains("query returned more than")
        || (message.contains("range")
            && ["too wide", "too large", "too big", "exceed", "limit"]
                .iter()
                .any(|hint| message.contains(hint)))
}

fn mentions_rate_limit(message: &str) -> bool {
    let message = message.to_lowercase();
    ["rate limit", "too many requests", "compute units", "capacity"]
        .iter()
        .any(|hint| message.contains(hint))
}

pub fn classify(err: &inflow_utils::Error) -> FailureKind {
    use inflow_utils::{reqwest::ReqwestStage, Error};

    if err.is_connect() || err.is_timeout() {
        return FailureKind::Transient;
    }

    match err {
        Error::RpcError { code, message, .. } => {
            if mentions_range_limit(message) {
                FailureKind::RangeTooWide
            } else if *code == 429 || mentions_rate_limit(message) {
                FailureKind::Transient
            } else if (-32099..=-32000).contains(code) || *code == -32603 {
                FailureKind::Transient
            } else {
                FailureKind::Fatal
            }
        }
        Error::ReqwestFailed {
            stage: ReqwestStage::DecodeText,
            ..
        } => FailureKind::Transient,
        _ if err.response_body().is_some_and(mentions_range_limit) => FailureKind::RangeTooWide,
        _ => match err.status_code() {
            Some(413) => FailureKind::RangeTooWide,
            Some(429) | Some(500..=599) => FailureKind::Transient,
            _ => FailureKind::Fatal,
        },
    }
}

/// Runs `op` until it succeeds, fails with a non transient error or runs out
/// of attempts. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> inflow_utils::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = inflow_utils::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify(&err) != FailureKind::Transient || attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "{what} failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::testutils::{rate_limited, rpc_error};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&rate_limited()), FailureKind::Transient);
        assert_eq!(
            classify(&rpc_error(-32000, "header not found")),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&rpc_error(
                -32602,
                "Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range"
            )),
            FailureKind::RangeTooWide
        );
        assert_eq!(
            classify(&rpc_error(-32602, "block range too wide")),
            FailureKind::RangeTooWide
        );
        assert_eq!(
            classify(&rpc_error(-32602, "invalid params")),
            FailureKind::Fatal
        );
        assert_eq!(
            classify(&inflow_utils::Error::AlchemyApiKeyNotSet),
            FailureKind::Fatal
        );
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(rate_limited())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: inflow_utils::Result<()> =
            with_retry(&RetryPolicy::immediate(4), "op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_fatal() {
        let calls = AtomicU32::new(0);
        let result: inflow_utils::Result<()> =
            with_retry(&RetryPolicy::immediate(4), "op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rpc_error(-32602, "invalid params"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
