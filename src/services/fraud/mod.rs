//! 风险控制：黑名单、风险评分、限流、异常分析

mod anomaly;
mod blocklist;
mod rate_limiter;
mod scorer;

pub use anomaly::{AnomalyAnalyzer, AnomalyFlag, AnomalyMonitor, AnomalyReport, analyze_scans};
pub use blocklist::{IpReputation, MemoryBlocklist, RedisBlocklist, build_blocklist};
pub use rate_limiter::{MemorySlidingWindow, RateDecision, RateLimitBackend, RateLimiter};
pub use scorer::{
    BLOCK_THRESHOLD, FraudScorer, RiskAssessment, RiskFlag, is_bot_user_agent,
};
