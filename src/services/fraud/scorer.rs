//! 扫码风险评分
//!
//! 加分制，黑名单命中直接返回 100：
//! - IP 在黑名单或黑名单网段 → 100，短路
//! - UA 命中爬虫词表 → +40
//! - 同一 IP 对同一链接近 5 分钟内超过 10 次 → +30
//! - UA 缺失 → +20
//!
//! 分数 >= 70 拦截

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use strum::AsRefStr;
use tracing::{debug, warn};

use super::blocklist::IpReputation;
use crate::config::FraudConfig;
use crate::storage::ScanStore;

pub const BLOCK_THRESHOLD: u8 = 70;
pub const BLOCKLIST_SCORE: u8 = 100;
pub const BOT_UA_WEIGHT: u8 = 40;
pub const HIGH_SCAN_RATE_WEIGHT: u8 = 30;
pub const MISSING_UA_WEIGHT: u8 = 20;

/// 小写子串匹配
pub const BOT_PATTERNS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "scrapy",
    "go-http-client",
    "okhttp",
    "libwww-perl",
    "java/",
    "axios",
    "node-fetch",
    "httpclient",
];

/// UA 是否命中爬虫词表
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    BOT_PATTERNS.iter().any(|p| ua.contains(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskFlag {
    IpBlocklisted,
    BotUserAgent,
    HighScanRate,
    MissingUserAgent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub blocked: bool,
    pub risk_score: u8,
    pub flags: Vec<RiskFlag>,
}

impl RiskAssessment {
    fn from_score(risk_score: u8, flags: Vec<RiskFlag>) -> Self {
        Self {
            blocked: risk_score >= BLOCK_THRESHOLD,
            risk_score,
            flags,
        }
    }
}

#[derive(Clone)]
pub struct FraudScorer {
    reputation: Arc<dyn IpReputation>,
    scans: Arc<dyn ScanStore>,
    recent_window: chrono::Duration,
    recent_limit: u64,
    lookup_timeout: Duration,
}

impl FraudScorer {
    pub fn new(
        reputation: Arc<dyn IpReputation>,
        scans: Arc<dyn ScanStore>,
        config: &FraudConfig,
    ) -> Self {
        Self {
            reputation,
            scans,
            recent_window: chrono::Duration::seconds(config.recent_scan_window_secs as i64),
            recent_limit: config.recent_scan_limit,
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
        }
    }

    pub async fn score(
        &self,
        ip: Option<&str>,
        user_agent: Option<&str>,
        short_link_id: i64,
    ) -> RiskAssessment {
        let ip_addr = ip.and_then(|s| s.parse::<IpAddr>().ok());

        if let Some(ref addr) = ip_addr
            && self.is_blocklisted(addr).await
        {
            debug!("Scan from blocklisted IP {} on link {}", addr, short_link_id);
            return RiskAssessment::from_score(BLOCKLIST_SCORE, vec![RiskFlag::IpBlocklisted]);
        }

        let mut score: u8 = 0;
        let mut flags = Vec::new();
        let user_agent = user_agent.map(str::trim).filter(|ua| !ua.is_empty());

        if user_agent.is_some_and(is_bot_user_agent) {
            score += BOT_UA_WEIGHT;
            flags.push(RiskFlag::BotUserAgent);
        }

        if let Some(ip) = ip
            && self.recent_scans(short_link_id, ip).await > self.recent_limit
        {
            score += HIGH_SCAN_RATE_WEIGHT;
            flags.push(RiskFlag::HighScanRate);
        }

        if user_agent.is_none() {
            score += MISSING_UA_WEIGHT;
            flags.push(RiskFlag::MissingUserAgent);
        }

        let assessment = RiskAssessment::from_score(score.min(BLOCKLIST_SCORE), flags);
        if assessment.blocked {
            debug!(
                "Scan on link {} blocked with risk score {} ({:?})",
                short_link_id, assessment.risk_score, assessment.flags
            );
        }
        assessment
    }

    /// 查询出错或超时视为未拉黑
    async fn is_blocklisted(&self, ip: &IpAddr) -> bool {
        match tokio::time::timeout(self.lookup_timeout, self.reputation.is_blocked(ip)).await {
            Ok(Ok(blocked)) => blocked,
            Ok(Err(e)) => {
                warn!("Blocklist '{}' lookup failed: {}", self.reputation.name(), e);
                false
            }
            Err(_) => {
                warn!("Blocklist '{}' lookup timed out", self.reputation.name());
                false
            }
        }
    }

    /// 查询出错或超时按 0 计
    async fn recent_scans(&self, short_link_id: i64, ip: &str) -> u64 {
        let since = Utc::now() - self.recent_window;
        match tokio::time::timeout(
            self.lookup_timeout,
            self.scans.count_scans_from_ip(short_link_id, ip, since),
        )
        .await
        {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!("Recent scan lookup failed: {}", e);
                0
            }
            Err(_) => {
                warn!("Recent scan lookup timed out");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_vocabulary() {
        assert!(is_bot_user_agent("Googlebot/2.1 (+http://www.google.com/bot.html)"));
        assert!(is_bot_user_agent("curl/8.4.0"));
        assert!(is_bot_user_agent("Mozilla/5.0 HeadlessChrome/120.0"));
        assert!(is_bot_user_agent("python-requests/2.31"));
        assert!(!is_bot_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Safari/604.1"
        ));
    }

    #[test]
    fn test_threshold() {
        assert!(!RiskAssessment::from_score(69, vec![]).blocked);
        assert!(RiskAssessment::from_score(70, vec![]).blocked);
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(RiskFlag::IpBlocklisted.as_ref(), "ip_blocklisted");
        assert_eq!(
            serde_json::to_string(&RiskFlag::HighScanRate).unwrap(),
            "\"high_scan_rate\""
        );
    }
}
