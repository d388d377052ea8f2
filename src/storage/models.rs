use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

/// 像素中转页最大等待时间（毫秒）
pub const MAX_REDIRECT_DELAY_MS: u32 = 10_000;

/// 动态二维码对应的短链接
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShortLink {
    pub id: i64,
    pub code: String,
    pub destination: String,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_scans: Option<u64>,
    #[serde(default)]
    pub scan_count: u64,
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// 过期 / 超限时传给错误页的备用地址
    pub fallback_url: Option<String>,
    pub utm: Option<UtmParams>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl ShortLink {
    pub fn new(code: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: 0,
            code: code.into(),
            destination: destination.into(),
            password: None,
            expires_at: None,
            max_scans: None,
            scan_count: 0,
            last_scanned_at: None,
            fallback_url: None,
            utm: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// 在给定时刻是否已过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// 当前计数是否已达到硬性扫码上限
    pub fn scan_limit_reached(&self) -> bool {
        self.max_scans.is_some_and(|max| self.scan_count >= max)
    }
}

/// 路由规则类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RuleType {
    Device,
    Time,
    Language,
    ScanLimit,
    Geo,
    UserAgent,
}

/// 路由规则
///
/// `condition` 为原始 JSON 载荷，由规则引擎按 `rule_type` 解析；
/// 解析失败的规则视为不匹配。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRule {
    pub id: i64,
    pub short_link_id: i64,
    pub rule_type: RuleType,
    pub condition: serde_json::Value,
    pub destination: String,
    pub priority: i32,
    pub is_active: bool,
}

impl RoutingRule {
    pub fn new(
        rule_type: RuleType,
        condition: serde_json::Value,
        destination: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: 0,
            short_link_id: 0,
            rule_type,
            condition,
            destination: destination.into(),
            priority,
            is_active: true,
        }
    }
}

/// 第三方像素提供商
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, EnumIter,
)]
pub enum PixelProvider {
    #[serde(rename = "meta", alias = "facebook")]
    #[strum(to_string = "meta", serialize = "facebook")]
    Meta,
    #[serde(rename = "google_tag_manager", alias = "gtm")]
    #[strum(to_string = "google_tag_manager", serialize = "gtm")]
    GoogleTagManager,
    #[serde(rename = "linkedin")]
    #[strum(serialize = "linkedin")]
    LinkedIn,
    #[serde(rename = "tiktok")]
    #[strum(serialize = "tiktok")]
    TikTok,
    #[serde(rename = "twitter", alias = "x")]
    #[strum(to_string = "twitter", serialize = "x")]
    Twitter,
    #[serde(rename = "custom")]
    #[strum(serialize = "custom")]
    Custom,
}

/// 像素配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PixelConfig {
    pub id: i64,
    pub short_link_id: i64,
    pub provider: PixelProvider,
    pub tracking_id: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub delay_redirect_ms: u32,
    pub is_active: bool,
    /// 仅 Custom provider 使用，原样插入页面
    pub custom_script: Option<String>,
}

impl PixelConfig {
    pub fn new(provider: PixelProvider, tracking_id: impl Into<String>, delay_ms: u32) -> Self {
        Self {
            id: 0,
            short_link_id: 0,
            provider,
            tracking_id: tracking_id.into(),
            events: Vec::new(),
            delay_redirect_ms: delay_ms,
            is_active: true,
            custom_script: None,
        }
    }

    /// 约束在 0..=10000 毫秒内的跳转延迟
    pub fn effective_delay_ms(&self) -> u32 {
        self.delay_redirect_ms.min(MAX_REDIRECT_DELAY_MS)
    }
}

/// UTM 参数，按 source → medium → campaign → term → content 顺序追加
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl UtmParams {
    /// 非空参数，按固定顺序返回 (key, value)
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("utm_source", &self.source),
            ("utm_medium", &self.medium),
            ("utm_campaign", &self.campaign),
            ("utm_term", &self.term),
            ("utm_content", &self.content),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs().is_empty()
    }
}

/// 一次成功解析的扫码记录（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanEvent {
    pub short_link_id: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub visitor_id: String,
    pub is_unique: bool,
    pub is_bot: bool,
    pub scanned_at: DateTime<Utc>,
}
