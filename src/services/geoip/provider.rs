//! GeoIP Provider 抽象层
//!
//! 统一的 GeoIP 查询接口，根据配置选择实现：
//! 1. maxminddb_path 已配置且可读 → MaxMindProvider 作为主 provider
//! 2. 否则 → primary_api_url 对应的 ExternalApiProvider
//! 3. secondary_api_url 已配置 → 备用 provider，仅在主 provider 出错或超时时使用

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::external_api::ExternalApiProvider;
use super::maxmind::MaxMindProvider;
use crate::config::GeoIpConfig;
use crate::utils::ip::is_private_or_local;

const GEOIP_CACHE_MAX_CAPACITY: u64 = 10_000;

/// 地理位置信息，未知字段为 None
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoInfo {
    /// ISO 3166-1 alpha-2 国家代码 (e.g., "CN", "US")
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoInfo {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.country_code.is_none() && self.country.is_none() && self.city.is_none()
    }

    /// 日志与记录用的国家名，未知时为 "Unknown"
    pub fn country_label(&self) -> &str {
        self.country
            .as_deref()
            .or(self.country_code.as_deref())
            .unwrap_or("Unknown")
    }
}

/// provider 级别的硬失败；非 2xx 或 `status: fail` 属于软失败，返回 Unknown
#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    Transport(String),
    Decode(String),
    Database(String),
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::Transport(msg) => write!(f, "transport error: {}", msg),
            GeoError::Decode(msg) => write!(f, "decode error: {}", msg),
            GeoError::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl std::error::Error for GeoError {}

/// GeoIP 查询 trait
#[async_trait]
pub trait GeoIpLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError>;

    /// 获取 provider 名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 统一 GeoIP Provider
///
/// 内置 Moka 缓存（singleflight：同一 IP 的并发查询只执行一次）；
/// 两个 provider 都失败时不缓存，下次重新查询
#[derive(Clone)]
pub struct GeoIpProvider {
    primary: Arc<dyn GeoIpLookup>,
    secondary: Option<Arc<dyn GeoIpLookup>>,
    timeout: Duration,
    cache: Cache<IpAddr, GeoInfo>,
}

impl GeoIpProvider {
    pub fn new(config: &GeoIpConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);

        let primary: Arc<dyn GeoIpLookup> = match config.maxminddb_path {
            Some(ref path) => match MaxMindProvider::new(path) {
                Ok(provider) => {
                    info!("GeoIP: Using MaxMind database at {}", path);
                    Arc::new(provider)
                }
                Err(e) => {
                    warn!(
                        "GeoIP: Failed to load MaxMind database at {}: {}, falling back to external API",
                        path, e
                    );
                    Arc::new(ExternalApiProvider::new(&config.primary_api_url, timeout))
                }
            },
            None => {
                debug!("GeoIP: No MaxMind database configured, using external API");
                Arc::new(ExternalApiProvider::new(&config.primary_api_url, timeout))
            }
        };

        let secondary = config
            .secondary_api_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| Arc::new(ExternalApiProvider::new(url, timeout)) as Arc<dyn GeoIpLookup>);

        info!(
            "GeoIP: Initialized with {} provider (secondary: {})",
            primary.name(),
            secondary.as_ref().map(|s| s.name()).unwrap_or("none")
        );

        Self::with_providers(
            primary,
            secondary,
            timeout,
            Duration::from_secs(config.cache_ttl_secs),
        )
    }

    pub fn with_providers(
        primary: Arc<dyn GeoIpLookup>,
        secondary: Option<Arc<dyn GeoIpLookup>>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(cache_ttl)
            .max_capacity(GEOIP_CACHE_MAX_CAPACITY)
            .build();

        Self {
            primary,
            secondary,
            timeout,
            cache,
        }
    }

    /// 解析 IP 地理位置，任何失败都返回 Unknown
    pub async fn resolve(&self, ip: &str) -> GeoInfo {
        let Ok(ip_addr) = ip.parse::<IpAddr>() else {
            trace!("GeoIP: unparseable address {:?}", ip);
            return GeoInfo::unknown();
        };
        if is_private_or_local(&ip_addr) {
            return GeoInfo::unknown();
        }

        self.cache
            .optionally_get_with(ip_addr, self.resolve_uncached(ip_addr))
            .await
            .unwrap_or_else(GeoInfo::unknown)
    }

    /// 整次解析共用一个截止时间；配置了备用 provider 时主 provider 只占一半预算
    async fn resolve_uncached(&self, ip: IpAddr) -> Option<GeoInfo> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let Some(secondary) = self.secondary.as_deref() else {
            return self.query(self.primary.as_ref(), ip, deadline).await;
        };

        let primary_deadline = started + self.timeout / 2;
        if let Some(info) = self.query(self.primary.as_ref(), ip, primary_deadline).await {
            return Some(info);
        }
        if Instant::now() >= deadline {
            debug!("GeoIP budget for {} exhausted, skipping {}", ip, secondary.name());
            return None;
        }
        self.query(secondary, ip, deadline).await
    }

    async fn query(
        &self,
        provider: &dyn GeoIpLookup,
        ip: IpAddr,
        deadline: Instant,
    ) -> Option<GeoInfo> {
        match tokio::time::timeout_at(deadline, provider.lookup(ip)).await {
            Ok(Ok(info)) => {
                trace!(
                    "GeoIP {} lookup for {}: {}",
                    provider.name(),
                    ip,
                    info.country_label()
                );
                Some(info)
            }
            Ok(Err(e)) => {
                warn!("GeoIP {} lookup for {} failed: {}", provider.name(), ip, e);
                None
            }
            Err(_) => {
                warn!(
                    "GeoIP {} lookup for {} ran past the {:?} budget",
                    provider.name(),
                    ip,
                    self.timeout
                );
                None
            }
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixed {
        result: Result<GeoInfo, GeoError>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(result: Result<GeoInfo, GeoError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(us()),
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl GeoIpLookup for Fixed {
        async fn lookup(&self, _ip: IpAddr) -> Result<GeoInfo, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }

        fn name(&self) -> &'static str {
            "Fixed"
        }
    }

    fn us() -> GeoInfo {
        GeoInfo {
            country_code: Some("US".into()),
            country: Some("United States".into()),
            city: Some("Ashburn".into()),
            ..Default::default()
        }
    }

    fn provider(primary: Arc<Fixed>, secondary: Option<Arc<Fixed>>) -> GeoIpProvider {
        GeoIpProvider::with_providers(
            primary,
            secondary.map(|s| s as Arc<dyn GeoIpLookup>),
            Duration::from_millis(50),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_secondary_used_when_primary_errors() {
        let primary = Fixed::new(Err(GeoError::Transport("refused".into())));
        let secondary = Fixed::new(Ok(us()));
        let geo = provider(primary, Some(secondary.clone()));

        assert_eq!(geo.resolve("8.8.8.8").await, us());
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secondary_skipped_on_soft_failure() {
        let primary = Fixed::new(Ok(GeoInfo::unknown()));
        let secondary = Fixed::new(Ok(us()));
        let geo = provider(primary, Some(secondary.clone()));

        assert!(geo.resolve("8.8.8.8").await.is_unknown());
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_falls_through_to_secondary() {
        let primary = Fixed::slow(Duration::from_millis(500));
        let secondary = Fixed::new(Ok(us()));
        let geo = provider(primary, Some(secondary.clone()));

        assert_eq!(geo.resolve("8.8.4.4").await.country_code.as_deref(), Some("US"));
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_providers_share_one_deadline() {
        let primary = Fixed::slow(Duration::from_millis(800));
        let secondary = Fixed::slow(Duration::from_millis(800));
        let geo = GeoIpProvider::with_providers(
            primary,
            Some(secondary.clone() as Arc<dyn GeoIpLookup>),
            Duration::from_millis(200),
            Duration::from_secs(60),
        );

        let started = std::time::Instant::now();
        assert!(geo.resolve("8.8.8.8").await.is_unknown());
        // 两个 provider 都挂起时总耗时不超过一个 timeout（留出调度余量）
        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failures_give_unknown_and_are_not_cached() {
        let primary = Fixed::new(Err(GeoError::Transport("down".into())));
        let geo = provider(primary.clone(), None);

        assert!(geo.resolve("1.1.1.1").await.is_unknown());
        assert!(geo.resolve("1.1.1.1").await.is_unknown());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_successful_lookup_is_cached() {
        let primary = Fixed::new(Ok(us()));
        let geo = provider(primary.clone(), None);

        geo.resolve("9.9.9.9").await;
        geo.resolve("9.9.9.9").await;
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_private_and_garbage_addresses_skip_lookup() {
        let primary = Fixed::new(Ok(us()));
        let geo = provider(primary.clone(), None);

        assert!(geo.resolve("192.168.0.10").await.is_unknown());
        assert!(geo.resolve("not-an-ip").await.is_unknown());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }
}
