// src/downloader/retry.rs

use crate::error::*;
use log::warn;
use std::{future::Future, time::Duration};

/// 线性退避：第 n 次重试前等待 `step * n`。只有瞬时错误会重试。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self { attempts, step }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.step * retry
    }

    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retry = 0;
        loop {
            match operation(retry).await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.attempts && e.is_transient() => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        "{} 失败 ({}/{}): {}，{:?} 后重试",
                        label,
                        retry,
                        self.attempts + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    fn reset() -> AppError {
        AppError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result = policy
            .run("测试", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(reset())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let result: AppResult<()> = policy
            .run("测试", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(reset())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: AppResult<()> = policy
            .run("测试", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::NotFound("gone".into()))
            })
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
