// src/player/clock.rs

use crate::error::AppResult;
use async_trait::async_trait;
use std::{future::Future, time::Duration};

/// 轮询循环使用的等待方式，测试中换成不真正等待的实现。
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 只记录累计等待时长，立即返回
#[cfg(any(test, feature = "testing"))]
#[derive(Default)]
pub struct InstantClock {
    slept: std::sync::Mutex<Duration>,
}

#[cfg(any(test, feature = "testing"))]
impl InstantClock {
    pub fn slept(&self) -> Duration {
        *self.slept.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        *self.slept.lock().unwrap_or_else(|e| e.into_inner()) += duration;
        tokio::task::yield_now().await;
    }
}

/// 最多探测 `attempts` 次，两次之间等待 `interval`。
/// 探测返回 `Some` 即结束；次数用完返回 `Ok(None)`。
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    attempts: u32,
    interval: Duration,
    mut probe: F,
) -> AppResult<Option<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<Option<T>>>,
{
    for attempt in 0..attempts {
        if attempt > 0 {
            clock.sleep(interval).await;
        }
        if let Some(value) = probe(attempt).await? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}
