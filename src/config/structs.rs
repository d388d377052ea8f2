use serde::{Deserialize, Serialize};

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 包含：
/// - server: 服务器地址、端口、CPU 数量
/// - database: 数据库连接配置
/// - logging: 日志配置
/// - geoip: 地理位置解析
/// - fraud: 风险评分与黑名单
/// - rate_limit: 每 IP 限流
/// - redirect: 跳转路由、错误页、访客 Cookie
/// - analytics: 扫码记录队列与异常分析
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub fraud: FraudConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：QR，分隔符：__
    /// 示例：QR__SERVER__PORT=9999
    pub fn load(path: &str) -> Self {
        use config::{Config, Environment, File};

        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("QR")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("fraud.blocked_ips")
                    .with_list_parse_key("fraud.blocked_ranges")
                    .with_list_parse_key("redirect.trusted_proxies"),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
}

/// 数据库连接配置
///
/// `database_url = "memory"` 时使用进程内存储（开发/演示用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

/// GeoIP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// MaxMindDB 文件路径 (GeoLite2-City.mmdb)
    /// 配置且可读时作为主 provider，否则使用 primary_api_url
    #[serde(default)]
    pub maxminddb_path: Option<String>,

    /// 主外部 API，使用 {ip} 作为占位符
    #[serde(default = "default_primary_api_url")]
    pub primary_api_url: String,

    /// 备用外部 API（仅在主 provider 出错时使用）
    #[serde(default = "default_secondary_api_url")]
    pub secondary_api_url: Option<String>,

    #[serde(default = "default_geoip_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_geoip_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// 风险评分配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudConfig {
    /// 启动时载入黑名单的 IP
    #[serde(default)]
    pub blocked_ips: Vec<String>,
    /// 启动时载入黑名单的 CIDR
    #[serde(default)]
    pub blocked_ranges: Vec<String>,
    /// memory | redis
    #[serde(default = "default_blocklist_backend")]
    pub blocklist_backend: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_key")]
    pub redis_key: String,
    #[serde(default = "default_recent_scan_window_secs")]
    pub recent_scan_window_secs: u64,
    #[serde(default = "default_recent_scan_limit")]
    pub recent_scan_limit: u64,
    /// 近期扫码计数查询超时
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

/// 每 IP 限流配置（滑动一分钟窗口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,
    /// 计数后端查询超时，超时放行
    #[serde(default = "default_rate_limit_timeout_ms")]
    pub timeout_ms: u64,
}

/// 跳转配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    /// 错误页地址，附加 type / fallback / message 查询参数
    #[serde(default = "default_error_page_url")]
    pub error_page_url: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_max_age_days")]
    pub cookie_max_age_days: i64,
    #[serde(default)]
    pub cookie_secure: bool,
    /// 可信反向代理（IP 或 CIDR）
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

/// 扫码记录与分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_retry_count")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 同时进行地理位置解析与事件写入的任务数
    #[serde(default = "default_enrich_concurrency")]
    pub enrich_concurrency: usize,
    /// 异常分析窗口，同时作为巡检间隔的上限
    #[serde(default = "default_anomaly_window_minutes")]
    pub anomaly_window_minutes: i64,
}

// ============================================================
// Default value functions
// ============================================================

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_cpu_count() -> usize {
    num_cpus::get()
}

fn default_database_url() -> String {
    "qrlinker.db".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_database_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

fn default_primary_api_url() -> String {
    "http://ip-api.com/json/{ip}?fields=status,country,countryCode,city,lat,lon".to_string()
}

fn default_secondary_api_url() -> Option<String> {
    Some("https://ipwho.is/{ip}".to_string())
}

fn default_geoip_timeout_ms() -> u64 {
    3000
}

fn default_geoip_cache_ttl() -> u64 {
    15 * 60
}

fn default_blocklist_backend() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key() -> String {
    "qrlinker:blocked_ips".to_string()
}

fn default_recent_scan_window_secs() -> u64 {
    5 * 60
}

fn default_recent_scan_limit() -> u64 {
    10
}

fn default_lookup_timeout_ms() -> u64 {
    500
}

fn default_requests_per_minute() -> u64 {
    60
}

fn default_rate_limit_timeout_ms() -> u64 {
    100
}

fn default_route_prefix() -> String {
    "/r".to_string()
}

fn default_error_page_url() -> String {
    "/scan-error".to_string()
}

fn default_cookie_name() -> String {
    "qr_vid".to_string()
}

fn default_cookie_max_age_days() -> i64 {
    30
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_enrich_concurrency() -> usize {
    32
}

fn default_anomaly_window_minutes() -> i64 {
    60
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cpu_count: default_cpu_count(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            timeout: default_database_timeout(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            maxminddb_path: None,
            primary_api_url: default_primary_api_url(),
            secondary_api_url: default_secondary_api_url(),
            timeout_ms: default_geoip_timeout_ms(),
            cache_ttl_secs: default_geoip_cache_ttl(),
        }
    }
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            blocked_ips: Vec::new(),
            blocked_ranges: Vec::new(),
            blocklist_backend: default_blocklist_backend(),
            redis_url: default_redis_url(),
            redis_key: default_redis_key(),
            recent_scan_window_secs: default_recent_scan_window_secs(),
            recent_scan_limit: default_recent_scan_limit(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
            timeout_ms: default_rate_limit_timeout_ms(),
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            route_prefix: default_route_prefix(),
            error_page_url: default_error_page_url(),
            cookie_name: default_cookie_name(),
            cookie_max_age_days: default_cookie_max_age_days(),
            cookie_secure: false,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_retry_count(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            enrich_concurrency: default_enrich_concurrency(),
            anomaly_window_minutes: default_anomaly_window_minutes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scan_contract() {
        let config = StaticConfig::default();
        assert_eq!(config.geoip.timeout_ms, 3000);
        assert_eq!(config.fraud.recent_scan_window_secs, 300);
        assert_eq!(config.fraud.recent_scan_limit, 10);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert!(config.rate_limit.timeout_ms < config.geoip.timeout_ms);
        assert_eq!(config.redirect.cookie_max_age_days, 30);
        assert_eq!(config.redirect.route_prefix, "/r");
        assert_eq!(config.analytics.anomaly_window_minutes, 60);
    }

    #[test]
    fn test_sample_config_roundtrips_through_toml() {
        let sample = StaticConfig::generate_sample_config();
        assert!(sample.contains("[redirect]"));
        let parsed: StaticConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.fraud.blocklist_backend, "memory");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: StaticConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [fraud]
            blocked_ips = ["203.0.113.7"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.server.host, "127.0.0.1");
        assert_eq!(parsed.fraud.blocked_ips, vec!["203.0.113.7".to_string()]);
        assert_eq!(parsed.fraud.lookup_timeout_ms, 500);
    }
}
