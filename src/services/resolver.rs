//! 扫码跳转编排
//!
//! 线性状态机，每一步都可能是终点：
//! 限流 → 查找 → 风控 → 过期 → 密码 → 扫码上限 → 上下文 → 规则 → UTM → 像素/跳转 → 记录
//!
//! 扫码上限检查读取的是门控时刻的计数，计数递增在后台完成；
//! 并发请求在只剩一个名额时可能同时通过。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::AsRefStr;
use tracing::{debug, trace};

use super::context::RedirectContext;
use super::fingerprint::visitor_id_from;
use super::fraud::{FraudScorer, RateDecision, RateLimiter};
use super::pixel::{build_relay_page, relay_delay_ms};
use super::rules::{RuleEngine, top_rule_of_type};
use super::utm::apply_utm;
use crate::analytics::{ScanJob, ScanRecorder};
use crate::errors::Result;
use crate::storage::{LinkRepository, RuleType, ShortLink};
use crate::utils::is_valid_short_code;
use crate::utils::password::check_link_password;

/// 单次扫码请求中与跳转相关的信号
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub code: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub referrer: Option<String>,
    /// `?password=` 查询参数
    pub password: Option<String>,
    /// 访客 cookie 原值，格式不正确时忽略
    pub visitor_cookie: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ScanRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            received_at: Utc::now(),
            ..Default::default()
        }
    }
}

/// 错误页类型，对应错误页的 `type` 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RejectionKind {
    NotFound,
    Expired,
    Password,
    Limit,
}

impl RejectionKind {
    pub fn message(&self) -> &'static str {
        match self {
            RejectionKind::NotFound => "QR code not found",
            RejectionKind::Expired => "This QR code has expired",
            RejectionKind::Password => "This QR code is password protected",
            RejectionKind::Limit => "This QR code has reached its scan limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub fallback: Option<String>,
}

impl Rejection {
    pub fn new(kind: RejectionKind) -> Self {
        Self {
            kind,
            fallback: None,
        }
    }

    pub fn with_fallback(kind: RejectionKind, fallback: Option<String>) -> Self {
        Self {
            kind,
            fallback: fallback.filter(|f| !f.is_empty()),
        }
    }

    /// 错误页地址：`{error_page}?type=...&fallback=...&message=...`
    pub fn error_page_location(&self, error_page_url: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("type", self.kind.as_ref());
        if let Some(ref fallback) = self.fallback {
            query.append_pair("fallback", fallback);
        }
        query.append_pair("message", self.kind.message());

        let separator = if error_page_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", error_page_url, separator, query.finish())
    }
}

/// 跳转决策
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectOutcome {
    /// 直接 307 跳转
    Redirect { location: String, visitor_id: String },
    /// 像素中转页
    Relay { html: String, visitor_id: String },
    /// 门控拒绝，跳转到错误页
    Rejected(Rejection),
    RateLimited { retry_after_secs: u64 },
}

impl RedirectOutcome {
    pub fn visitor_id(&self) -> Option<&str> {
        match self {
            RedirectOutcome::Redirect { visitor_id, .. }
            | RedirectOutcome::Relay { visitor_id, .. } => Some(visitor_id),
            _ => None,
        }
    }
}

pub struct RedirectEngine {
    links: Arc<dyn LinkRepository>,
    rules: RuleEngine,
    fraud: FraudScorer,
    rate_limiter: Option<RateLimiter>,
    recorder: Option<Arc<ScanRecorder>>,
}

impl RedirectEngine {
    pub fn new(links: Arc<dyn LinkRepository>, rules: RuleEngine, fraud: FraudScorer) -> Self {
        Self {
            links,
            rules,
            fraud,
            rate_limiter: None,
            recorder: None,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<ScanRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 解析一次扫码；只有存储层故障会返回 Err
    pub async fn resolve(&self, request: &ScanRequest) -> Result<RedirectOutcome> {
        if let (Some(limiter), Some(ip)) = (&self.rate_limiter, request.ip.as_deref())
            && let RateDecision::Limited { retry_after } = limiter.check(ip).await
        {
            let retry_after_secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            return Ok(RedirectOutcome::RateLimited { retry_after_secs });
        }

        if !is_valid_short_code(&request.code) {
            trace!("Invalid short code rejected: {}", request.code);
            return Ok(RedirectOutcome::Rejected(Rejection::new(
                RejectionKind::NotFound,
            )));
        }

        let Some(link) = self.links.find_by_code(&request.code).await? else {
            debug!("QR code not found: {}", request.code);
            return Ok(RedirectOutcome::Rejected(Rejection::new(
                RejectionKind::NotFound,
            )));
        };

        // 风控拦截对外表现为 not-found
        let risk = self
            .fraud
            .score(
                request.ip.as_deref(),
                request.user_agent.as_deref(),
                link.id,
            )
            .await;
        if risk.blocked {
            return Ok(RedirectOutcome::Rejected(Rejection::new(
                RejectionKind::NotFound,
            )));
        }

        if link.is_expired_at(request.received_at) {
            debug!("QR code {} expired", link.code);
            return Ok(RedirectOutcome::Rejected(Rejection::with_fallback(
                RejectionKind::Expired,
                link.fallback_url.clone(),
            )));
        }

        if !Self::password_accepted(&link, request.password.as_deref()) {
            debug!("QR code {} password mismatch", link.code);
            return Ok(RedirectOutcome::Rejected(Rejection::new(
                RejectionKind::Password,
            )));
        }

        let rules = self.links.active_rules(link.id).await?;

        if link.scan_limit_reached() {
            debug!(
                "QR code {} reached scan limit ({}/{:?})",
                link.code, link.scan_count, link.max_scans
            );
            let fallback = top_rule_of_type(&rules, RuleType::ScanLimit)
                .map(|rule| rule.destination.clone())
                .or_else(|| link.fallback_url.clone());
            return Ok(RedirectOutcome::Rejected(Rejection::with_fallback(
                RejectionKind::Limit,
                fallback,
            )));
        }

        let visitor_id = visitor_id_from(
            request.visitor_cookie.as_deref(),
            request.ip.as_deref(),
            request.user_agent.as_deref(),
            request.accept_language.as_deref(),
            request.accept_encoding.as_deref(),
        );
        let context = RedirectContext {
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            accept_language: request.accept_language.clone(),
            accept_encoding: request.accept_encoding.clone(),
            referrer: request.referrer.clone(),
            timestamp: request.received_at,
            scan_count: link.scan_count,
            visitor_id: visitor_id.clone(),
        };

        let evaluation = self
            .rules
            .evaluate(&rules, &context, &link.destination)
            .await;
        trace!("QR code {}: {}", link.code, evaluation.reason);

        let destination = match link.utm {
            Some(ref utm) if !utm.is_empty() => apply_utm(&evaluation.destination, utm),
            _ => evaluation.destination,
        };

        let pixels = self.links.active_pixels(link.id).await?;
        let outcome = if pixels.is_empty() {
            RedirectOutcome::Redirect {
                location: destination,
                visitor_id: visitor_id.clone(),
            }
        } else {
            let delay = relay_delay_ms(&pixels);
            RedirectOutcome::Relay {
                html: build_relay_page(&pixels, &destination, delay),
                visitor_id: visitor_id.clone(),
            }
        };

        self.record(&link, &context);
        Ok(outcome)
    }

    fn password_accepted(link: &ShortLink, provided: Option<&str>) -> bool {
        match link.password.as_deref().filter(|p| !p.is_empty()) {
            None => true,
            Some(stored) => provided.is_some_and(|p| check_link_password(p, stored)),
        }
    }

    fn record(&self, link: &ShortLink, context: &RedirectContext) {
        let Some(ref recorder) = self.recorder else {
            return;
        };
        let mut job = ScanJob::new(link.id, context.visitor_id.clone(), context.timestamp);
        job.ip = context.ip.clone();
        job.user_agent = context.user_agent.clone();
        job.referrer = context.referrer.clone();
        recorder.record(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FraudConfig;
    use crate::services::fraud::MemoryBlocklist;
    use crate::storage::{MemoryStorage, PixelConfig, PixelProvider, RoutingRule, UtmParams};
    use serde_json::json;

    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
    const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    fn engine(storage: &Arc<MemoryStorage>) -> RedirectEngine {
        let fraud = FraudScorer::new(
            Arc::new(MemoryBlocklist::new()),
            storage.clone(),
            &FraudConfig::default(),
        );
        RedirectEngine::new(storage.clone(), RuleEngine::new(None), fraud)
    }

    fn scan(code: &str, ua: &str) -> ScanRequest {
        ScanRequest {
            ip: Some("203.0.113.10".to_string()),
            user_agent: Some(ua.to_string()),
            ..ScanRequest::new(code)
        }
    }

    fn location(outcome: RedirectOutcome) -> String {
        match outcome {
            RedirectOutcome::Redirect { location, .. } => location,
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_error_page_location() {
        let rejection = Rejection::with_fallback(
            RejectionKind::Expired,
            Some("https://example.com/old".to_string()),
        );
        assert_eq!(
            rejection.error_page_location("/scan-error"),
            "/scan-error?type=expired&fallback=https%3A%2F%2Fexample.com%2Fold&message=This+QR+code+has+expired"
        );
        assert_eq!(
            Rejection::new(RejectionKind::NotFound).error_page_location("https://app.test/err?lang=en"),
            "https://app.test/err?lang=en&type=not-found&message=QR+code+not+found"
        );
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_codes() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(&storage);
        for code in ["missing", "bad code!", ""] {
            let outcome = engine.resolve(&scan(code, DESKTOP_UA)).await.unwrap();
            assert_eq!(
                outcome,
                RedirectOutcome::Rejected(Rejection::new(RejectionKind::NotFound))
            );
        }
    }

    #[tokio::test]
    async fn test_device_rule_and_default() {
        let storage = Arc::new(MemoryStorage::new());
        let id = storage
            .insert_link(ShortLink::new("app", "https://example.com"))
            .unwrap();
        storage.add_rule(
            id,
            RoutingRule::new(
                RuleType::Device,
                json!({"devices": ["ios"]}),
                "https://apps.apple.com/x",
                100,
            ),
        );
        let engine = engine(&storage);

        let ios = engine.resolve(&scan("app", IPHONE_UA)).await.unwrap();
        assert_eq!(location(ios), "https://apps.apple.com/x");
        let desktop = engine.resolve(&scan("app", DESKTOP_UA)).await.unwrap();
        assert_eq!(location(desktop), "https://example.com");
    }

    #[tokio::test]
    async fn test_gates_run_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let mut link = ShortLink::new("gated", "https://example.com");
        link.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        link.password = Some("secret".to_string());
        link.max_scans = Some(1);
        link.scan_count = 1;
        storage.insert_link(link).unwrap();
        let engine = engine(&storage);

        // 过期优先于密码和上限
        let outcome = engine.resolve(&scan("gated", DESKTOP_UA)).await.unwrap();
        assert!(matches!(
            outcome,
            RedirectOutcome::Rejected(Rejection { kind: RejectionKind::Expired, .. })
        ));
    }

    #[tokio::test]
    async fn test_password_gate() {
        let storage = Arc::new(MemoryStorage::new());
        let mut link = ShortLink::new("locked", "https://example.com/menu");
        link.password = Some("open-sesame".to_string());
        storage.insert_link(link).unwrap();
        let engine = engine(&storage);

        let missing = engine.resolve(&scan("locked", DESKTOP_UA)).await.unwrap();
        assert_eq!(
            missing,
            RedirectOutcome::Rejected(Rejection::new(RejectionKind::Password))
        );

        let mut request = scan("locked", DESKTOP_UA);
        request.password = Some("wrong".to_string());
        assert!(matches!(
            engine.resolve(&request).await.unwrap(),
            RedirectOutcome::Rejected(_)
        ));

        request.password = Some("open-sesame".to_string());
        assert_eq!(
            location(engine.resolve(&request).await.unwrap()),
            "https://example.com/menu"
        );
    }

    #[tokio::test]
    async fn test_limit_gate_uses_scan_limit_rule_fallback() {
        let storage = Arc::new(MemoryStorage::new());
        let mut link = ShortLink::new("capped", "https://example.com");
        link.max_scans = Some(5);
        link.scan_count = 5;
        link.fallback_url = Some("https://example.com/fallback".to_string());
        let id = storage.insert_link(link).unwrap();
        storage.add_rule(
            id,
            RoutingRule::new(
                RuleType::ScanLimit,
                json!({"threshold": 3}),
                "https://example.com/sold-out",
                10,
            ),
        );
        let engine = engine(&storage);

        let outcome = engine.resolve(&scan("capped", DESKTOP_UA)).await.unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Rejected(Rejection::with_fallback(
                RejectionKind::Limit,
                Some("https://example.com/sold-out".to_string())
            ))
        );
    }

    #[tokio::test]
    async fn test_utm_and_pixels() {
        let storage = Arc::new(MemoryStorage::new());
        let mut link = ShortLink::new("promo", "https://example.com/product");
        link.utm = Some(UtmParams {
            source: Some("instagram".into()),
            medium: Some("social".into()),
            ..Default::default()
        });
        let id = storage.insert_link(link).unwrap();
        let engine = engine(&storage);

        let plain = engine.resolve(&scan("promo", DESKTOP_UA)).await.unwrap();
        assert_eq!(
            location(plain),
            "https://example.com/product?utm_source=instagram&utm_medium=social"
        );

        storage.add_pixel(id, PixelConfig::new(PixelProvider::Meta, "111", 800));
        storage.add_pixel(id, PixelConfig::new(PixelProvider::TikTok, "222", 1500));
        match engine.resolve(&scan("promo", DESKTOP_UA)).await.unwrap() {
            RedirectOutcome::Relay { html, visitor_id } => {
                assert!(html.contains("setTimeout(go, 1500)"));
                assert!(html.contains("utm_source=instagram"));
                assert_eq!(visitor_id.len(), 32);
            }
            other => panic!("expected relay, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cookie_visitor_id_takes_precedence() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_link(ShortLink::new("vid", "https://example.com"))
            .unwrap();
        let engine = engine(&storage);

        let cookie = "0123456789abcdef0123456789abcdef".to_string();
        let mut request = scan("vid", DESKTOP_UA);
        request.visitor_cookie = Some(cookie.clone());
        let outcome = engine.resolve(&request).await.unwrap();
        assert_eq!(outcome.visitor_id(), Some(cookie.as_str()));

        request.visitor_cookie = Some("not-a-visitor-id".to_string());
        let outcome = engine.resolve(&request).await.unwrap();
        assert_ne!(outcome.visitor_id(), Some("not-a-visitor-id"));
    }

    #[tokio::test]
    async fn test_blocked_scan_looks_like_not_found() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_link(ShortLink::new("guarded", "https://example.com"))
            .unwrap();
        let fraud_config = FraudConfig {
            blocked_ips: vec!["203.0.113.10".to_string()],
            ..Default::default()
        };
        let fraud = FraudScorer::new(
            Arc::new(MemoryBlocklist::from_config(&fraud_config)),
            storage.clone(),
            &fraud_config,
        );
        let engine = RedirectEngine::new(storage.clone(), RuleEngine::new(None), fraud);

        let outcome = engine.resolve(&scan("guarded", IPHONE_UA)).await.unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Rejected(Rejection::new(RejectionKind::NotFound))
        );
    }
}
