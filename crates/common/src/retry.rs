//! 通用重试机制模块
//!
//! 提供带指数退避的有界重试逻辑，发布与重连共用同一退避形状

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 通用重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大尝试次数（首次尝试 + 重试）
    pub max_attempts: u32,
    /// 初始延迟
    pub initial_delay: Duration,
    /// 最大延迟
    pub max_delay: Duration,
    /// 退避乘数
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 创建新的重试配置
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// 按重试次数创建：共 `retries + 1` 次尝试
    pub fn from_retries(retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), initial_delay, max_delay)
    }

    /// 设置退避乘数
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// 计算第 n 次重试的延迟
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_delay = (delay_ms as u64).min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_delay)
    }
}

/// 通用可重试错误模式
pub const COMMON_RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "network",
    "econnrefused",
    "etimedout",
    "econnreset",
    "broken pipe",
    "connection closed",
    "transport failure",
    "all brokers down",
    "leader not available",
    "not leader",
    "no route to host",
];

/// 判断错误是否可重试（按错误描述匹配）
pub fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();
    COMMON_RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| error_lower.contains(pattern))
}

/// 一次带重试操作的结果及实际尝试次数
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// 带条件重试的异步操作执行器
///
/// 只有当 `should_retry` 返回 true 且尚未达到 `max_attempts` 时才会重试，
/// 返回最终结果和实际尝试次数
pub async fn with_conditional_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Attempted {
                    result: Ok(result),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let can_retry = should_retry(&e);

                if !can_retry {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Operation failed, no more retries"
                    );
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let outcome: Attempted<i32, &str> =
            with_conditional_retry(&fast(3), "test", || async { Ok(42) }, |_| true).await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let outcome: Attempted<i32, &str> = with_conditional_retry(
            &fast(3),
            "test",
            || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err("retryable error")
                    } else {
                        Ok(42)
                    }
                }
            },
            |e| e.contains("retryable"),
        )
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_all_failures() {
        let counter = AtomicU32::new(0);

        let outcome: Attempted<i32, &str> = with_conditional_retry(
            &fast(4),
            "test",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("retryable error") }
            },
            |_| true,
        )
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_conditional_retry_non_retryable() {
        let counter = AtomicU32::new(0);

        let outcome: Attempted<i32, &str> = with_conditional_retry(
            &fast(5),
            "test",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent error") }
            },
            |e| e.contains("retryable"),
        )
        .await;

        assert!(outcome.result.is_err());
        // 不可重试错误只尝试一次
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let outcome: Attempted<(), &str> =
            with_conditional_retry(&fast(0), "test", || async { Err("boom") }, |_| true).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_from_retries() {
        let config = RetryConfig::from_retries(3, Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(config.max_attempts, 4);

        let config =
            RetryConfig::from_retries(u32::MAX, Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(config.max_attempts, u32::MAX);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_millis(100), Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        // Should be capped at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("connection refused"));
        assert!(is_retryable_error("Local: Broker transport failure"));
        assert!(is_retryable_error("Local: All brokers down"));
        assert!(is_retryable_error("Broker: Leader not available"));
        assert!(is_retryable_error("Local: Message timed out"));
        assert!(!is_retryable_error("Broker: Topic authorization failed"));
        assert!(!is_retryable_error("Broker: Message size too large"));
    }
}
