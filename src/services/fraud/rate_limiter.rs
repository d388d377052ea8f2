//! 每 IP 滑动窗口限流
//!
//! 窗口内只记录被放行的请求；后端出错或超时时放行。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// 计数后端
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// 窗口内计数未满时记录本次请求并放行
    async fn acquire(&self, key: &str, limit: u64, window: Duration)
    -> anyhow::Result<RateDecision>;

    fn name(&self) -> &'static str;
}

/// 进程内滑动日志
#[derive(Default)]
pub struct MemorySlidingWindow {
    log: DashMap<String, VecDeque<Instant>>,
}

impl MemorySlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理窗口外的记录与空条目
    pub fn sweep(&self, window: Duration) {
        let now = Instant::now();
        self.log.retain(|_, hits| {
            while hits
                .front()
                .is_some_and(|t| now.duration_since(*t) >= window)
            {
                hits.pop_front();
            }
            !hits.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.log.len()
    }
}

#[async_trait]
impl RateLimitBackend for MemorySlidingWindow {
    async fn acquire(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> anyhow::Result<RateDecision> {
        let now = Instant::now();
        let mut hits = self.log.entry(key.to_string()).or_default();

        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        if (hits.len() as u64) < limit {
            hits.push_back(now);
            return Ok(RateDecision::Allowed {
                remaining: limit - hits.len() as u64,
            });
        }

        let retry_after = hits
            .front()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(window);
        Ok(RateDecision::Limited { retry_after })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    limit: u64,
    window: Duration,
    timeout: Duration,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_backend(config, Arc::new(MemorySlidingWindow::new()))
    }

    pub fn with_backend(config: &RateLimitConfig, backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            backend,
            limit: config.requests_per_minute,
            window: WINDOW,
            timeout: Duration::from_millis(config.timeout_ms),
            enabled: config.enabled,
        }
    }

    pub async fn check(&self, ip: &str) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed {
                remaining: self.limit,
            };
        }

        let allowed = RateDecision::Allowed {
            remaining: self.limit,
        };
        match tokio::time::timeout(
            self.timeout,
            self.backend.acquire(ip, self.limit, self.window),
        )
        .await
        {
            Ok(Ok(decision)) => {
                if !decision.is_allowed() {
                    debug!("Rate limit exceeded for {}", ip);
                }
                decision
            }
            Ok(Err(e)) => {
                warn!(
                    "Rate limit backend '{}' failed, allowing request: {}",
                    self.backend.name(),
                    e
                );
                allowed
            }
            Err(_) => {
                warn!(
                    "Rate limit backend '{}' timed out after {:?}, allowing request",
                    self.backend.name(),
                    self.timeout
                );
                allowed
            }
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
