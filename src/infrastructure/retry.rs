//! 临时性失败的重试与退避
//!
//! 只重试 `SubmissionError::is_transient()` 的错误；认证失败等其他错误立即返回。
//! 等待期间和请求进行中都会响应取消信号。

use crate::config::OperationalConfig;
use crate::error::SubmissionError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_factor: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OperationalConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &OperationalConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
            backoff_factor: config.backoff_factor,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// 不等待、不重试（测试用）
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_ms: 0,
            backoff_factor: 1,
            max_backoff_ms: 0,
        }
    }

    /// 第 `attempt` 次重试前的等待时间（从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_factor.saturating_pow(exponent);
        let ms = self
            .backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// 执行操作，临时性失败时按退避重试
    ///
    /// # 参数
    /// - `label`: 日志前缀，例如 `[学生 plab1001] 上传 PE_1A.py`
    /// - `cancel`: 运行级取消信号
    /// - `op`: 每次调用产生一次新的请求
    ///
    /// # 返回
    /// 操作结果；被取消时返回 `SubmissionError::Cancelled`
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, SubmissionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SubmissionError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SubmissionError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} ⚠️ 临时失败 (尝试 {}/{}): {}，{}ms 后重试...",
                        label,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_ms: 100,
            backoff_factor: 2,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result = RetryPolicy::immediate(3)
            .run("[test]", &cancel, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SubmissionError::Transient("503".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("[test]", &cancel, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SubmissionError::Auth("401".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(SubmissionError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = RetryPolicy::immediate(3)
            .run("[test]", &cancel, || async { Ok::<_, SubmissionError>(1) })
            .await;

        assert!(matches!(result, Err(SubmissionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run("[test]", &cancel, || async {
                Err(SubmissionError::Transient("timeout".into()))
            })
            .await;
        assert!(matches!(result, Err(SubmissionError::Transient(_))));
    }
}
