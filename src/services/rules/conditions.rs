//! 规则条件的解析与匹配
//!
//! 条件载荷是用户配置的 JSON，解析失败的规则视为不匹配。

use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use moka::sync::Cache;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use strum::{AsRefStr, EnumString};
use tracing::warn;

use crate::services::geoip::GeoInfo;
use crate::storage::RuleType;

/// UA 解析出的设备平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DevicePlatform {
    Ios,
    Android,
    Windows,
    Mac,
    Linux,
    Other,
}

/// 按固定顺序做子串检查（iPhone 的 UA 里也有 "Mac OS X"，Android 的 UA 里也有 "Linux"）
pub fn detect_platform(user_agent: &str) -> DevicePlatform {
    if ["iPhone", "iPad", "iPod"].iter().any(|s| user_agent.contains(s)) {
        DevicePlatform::Ios
    } else if user_agent.contains("Android") {
        DevicePlatform::Android
    } else if user_agent.contains("Windows") {
        DevicePlatform::Windows
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        DevicePlatform::Mac
    } else if user_agent.contains("Linux") {
        DevicePlatform::Linux
    } else {
        DevicePlatform::Other
    }
}

/// 解析 Accept-Language 为主语言代码：`en-US,fr;q=0.8` → `["en", "fr"]`
pub fn parse_accept_language(header: &str) -> Vec<String> {
    header
        .split(',')
        .filter_map(|part| {
            let tag = part.split(';').next()?.trim();
            let primary = tag.split('-').next()?.trim().to_ascii_lowercase();
            (!primary.is_empty() && primary != "*").then_some(primary)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct DevicePayload {
    #[serde(alias = "os", alias = "platforms")]
    devices: Vec<String>,
}

/// 星期：0-6（周日为 0）或英文名/缩写
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DaySpec {
    Index(u32),
    Name(String),
}

impl DaySpec {
    fn to_index(&self) -> Option<u32> {
        match self {
            DaySpec::Index(i) if *i < 7 => Some(*i),
            DaySpec::Index(_) => None,
            DaySpec::Name(name) => {
                let lower = name.to_ascii_lowercase();
                ["sun", "mon", "tue", "wed", "thu", "fri", "sat"]
                    .iter()
                    .position(|d| lower.starts_with(d))
                    .map(|p| p as u32)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePayload {
    #[serde(default)]
    days: Option<Vec<DaySpec>>,
    start_time: String,
    end_time: String,
}

#[derive(Debug, Deserialize)]
struct TimePayload {
    #[serde(default)]
    timezone: Option<String>,
    #[serde(alias = "schedule")]
    schedules: Vec<SchedulePayload>,
}

#[derive(Debug, Deserialize)]
struct LanguagePayload {
    #[serde(alias = "language")]
    languages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScanLimitPayload {
    #[serde(alias = "limit", alias = "maxScans")]
    threshold: u64,
}

#[derive(Debug, Deserialize)]
struct GeoPayload {
    #[serde(default)]
    countries: Vec<String>,
    #[serde(default)]
    cities: Vec<String>,
    #[serde(default)]
    exclude: bool,
}

#[derive(Debug, Deserialize)]
struct UserAgentPayload {
    #[serde(alias = "pattern")]
    patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    /// None 表示不限星期
    days: Option<Vec<u32>>,
    start: String,
    end: String,
}

/// 解析后的规则条件
#[derive(Debug, Clone)]
pub enum Condition {
    Device(Vec<DevicePlatform>),
    Time { timezone: Tz, schedules: Vec<Schedule> },
    Language(Vec<String>),
    ScanLimit(u64),
    Geo {
        countries: Vec<String>,
        cities: Vec<String>,
        exclude: bool,
    },
    /// 全部模式编译失败时为空，永不匹配
    UserAgent(Vec<Regex>),
}

/// 编译过的 UA 正则缓存；编译失败也会缓存，避免每次请求重试
pub struct PatternCache {
    cache: Cache<String, Option<Regex>>,
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PatternCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn get(&self, pattern: &str) -> Option<Regex> {
        self.cache.get_with(pattern.to_string(), || {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(1 << 20)
                .build()
                .map_err(|e| warn!("Skipping invalid userAgent pattern {:?}: {}", pattern, e))
                .ok()
        })
    }
}

impl Condition {
    /// 解析条件载荷，失败时返回原因
    pub fn parse(
        rule_type: RuleType,
        payload: &Value,
        patterns: &PatternCache,
    ) -> Result<Condition, String> {
        fn decode<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, String> {
            T::deserialize(payload).map_err(|e| e.to_string())
        }

        match rule_type {
            RuleType::Device => {
                let p: DevicePayload = decode(payload)?;
                let devices = p
                    .devices
                    .iter()
                    .filter_map(|d| DevicePlatform::from_str(d.trim()).ok())
                    .collect::<Vec<_>>();
                if devices.is_empty() {
                    return Err("no recognised devices".to_string());
                }
                Ok(Condition::Device(devices))
            }
            RuleType::Time => {
                let p: TimePayload = decode(payload)?;
                let timezone = match p.timezone.as_deref().map(str::trim) {
                    None | Some("") => Tz::UTC,
                    Some(name) => {
                        Tz::from_str(name).map_err(|_| format!("unknown timezone {}", name))?
                    }
                };
                let schedules = p
                    .schedules
                    .into_iter()
                    .map(|s| -> Result<Schedule, String> {
                        let days = match s.days {
                            None => None,
                            Some(days) if days.is_empty() => None,
                            Some(days) => Some(
                                days.iter()
                                    .map(|d| d.to_index().ok_or("invalid day".to_string()))
                                    .collect::<Result<Vec<_>, _>>()?,
                            ),
                        };
                        Ok(Schedule {
                            days,
                            start: s.start_time.trim().to_string(),
                            end: s.end_time.trim().to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Condition::Time {
                    timezone,
                    schedules,
                })
            }
            RuleType::Language => {
                let p: LanguagePayload = decode(payload)?;
                Ok(Condition::Language(
                    p.languages
                        .iter()
                        .map(|l| l.trim().to_ascii_lowercase())
                        .collect(),
                ))
            }
            RuleType::ScanLimit => {
                let p: ScanLimitPayload = decode(payload)?;
                Ok(Condition::ScanLimit(p.threshold))
            }
            RuleType::Geo => {
                let p: GeoPayload = decode(payload)?;
                if p.countries.is_empty() && p.cities.is_empty() {
                    return Err("geo condition lists no countries or cities".to_string());
                }
                Ok(Condition::Geo {
                    countries: p.countries.iter().map(|c| c.trim().to_lowercase()).collect(),
                    cities: p.cities.iter().map(|c| c.trim().to_lowercase()).collect(),
                    exclude: p.exclude,
                })
            }
            RuleType::UserAgent => {
                let p: UserAgentPayload = decode(payload)?;
                Ok(Condition::UserAgent(
                    p.patterns.iter().filter_map(|pat| patterns.get(pat)).collect(),
                ))
            }
        }
    }

    pub fn matches_device(allowed: &[DevicePlatform], user_agent: &str) -> bool {
        allowed.contains(&detect_platform(user_agent))
    }

    pub fn matches_time(timezone: &Tz, schedules: &[Schedule], at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(timezone);
        let weekday = local.weekday().num_days_from_sunday();
        let now = local.format("%H:%M").to_string();

        schedules.iter().any(|s| {
            let day_ok = s.days.as_ref().is_none_or(|days| days.contains(&weekday));
            day_ok && s.start.as_str() <= now.as_str() && now.as_str() <= s.end.as_str()
        })
    }

    pub fn matches_language(allowed: &[String], accept_language: Option<&str>) -> bool {
        accept_language
            .map(parse_accept_language)
            .is_some_and(|codes| codes.iter().any(|c| allowed.contains(c)))
    }

    pub fn matches_geo(countries: &[String], cities: &[String], exclude: bool, geo: &GeoInfo) -> bool {
        let lower = |s: &Option<String>| s.as_deref().map(str::to_lowercase);
        let code = lower(&geo.country_code);
        let country = lower(&geo.country);
        let city = lower(&geo.city);

        let hit = countries
            .iter()
            .any(|c| Some(c) == code.as_ref() || Some(c) == country.as_ref())
            || cities.iter().any(|c| Some(c) == city.as_ref());
        hit != exclude
    }

    pub fn matches_user_agent(patterns: &[Regex], user_agent: &str) -> bool {
        patterns.iter().any(|re| re.is_match(user_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36";
    const MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15";
    const WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
    const UBUNTU: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101";

    #[test]
    fn test_detect_platform_order() {
        assert_eq!(detect_platform(IPHONE), DevicePlatform::Ios);
        assert_eq!(detect_platform("Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)"), DevicePlatform::Ios);
        assert_eq!(detect_platform(PIXEL), DevicePlatform::Android);
        assert_eq!(detect_platform(WIN), DevicePlatform::Windows);
        assert_eq!(detect_platform(MAC), DevicePlatform::Mac);
        assert_eq!(detect_platform(UBUNTU), DevicePlatform::Linux);
        assert_eq!(detect_platform("Nokia6300/2.0"), DevicePlatform::Other);
        assert_eq!(detect_platform(""), DevicePlatform::Other);
    }

    #[test]
    fn test_parse_accept_language() {
        assert_eq!(
            parse_accept_language("en-US,en;q=0.9,FR-ca;q=0.8, *;q=0.1"),
            vec!["en", "en", "fr"]
        );
        assert!(parse_accept_language("").is_empty());
    }

    #[test]
    fn test_time_window_inclusive_in_timezone() {
        let patterns = PatternCache::default();
        let cond = Condition::parse(
            RuleType::Time,
            &json!({
                "timezone": "America/New_York",
                "schedules": [{"days": [1, 2, 3, 4, 5], "startTime": "09:00", "endTime": "17:00"}]
            }),
            &patterns,
        )
        .unwrap();
        let Condition::Time { timezone, schedules } = cond else {
            panic!("expected time condition");
        };

        // 2026-10-12 是周一；13:00 UTC = 09:00 EDT
        let monday_nine = Utc.with_ymd_and_hms(2026, 10, 12, 13, 0, 0).unwrap();
        assert!(Condition::matches_time(&timezone, &schedules, monday_nine));
        let monday_five = Utc.with_ymd_and_hms(2026, 10, 12, 21, 0, 59).unwrap();
        assert!(Condition::matches_time(&timezone, &schedules, monday_five));
        let monday_late = Utc.with_ymd_and_hms(2026, 10, 12, 21, 1, 0).unwrap();
        assert!(!Condition::matches_time(&timezone, &schedules, monday_late));
        // 周日
        let sunday = Utc.with_ymd_and_hms(2026, 10, 11, 15, 0, 0).unwrap();
        assert!(!Condition::matches_time(&timezone, &schedules, sunday));
    }

    #[test]
    fn test_time_day_names_and_default_utc() {
        let patterns = PatternCache::default();
        let Condition::Time { timezone, schedules } = Condition::parse(
            RuleType::Time,
            &json!({"schedule": [{"days": ["Sunday"], "startTime": "00:00", "endTime": "23:59"}]}),
            &patterns,
        )
        .unwrap() else {
            panic!("expected time condition");
        };
        assert_eq!(timezone, Tz::UTC);
        let sunday = Utc.with_ymd_and_hms(2026, 10, 11, 12, 0, 0).unwrap();
        assert!(Condition::matches_time(&timezone, &schedules, sunday));
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        let patterns = PatternCache::default();
        assert!(Condition::parse(RuleType::Device, &json!({"devices": "ios"}), &patterns).is_err());
        assert!(Condition::parse(RuleType::Device, &json!({"devices": ["toaster"]}), &patterns).is_err());
        assert!(
            Condition::parse(
                RuleType::Time,
                &json!({"timezone": "Mars/Olympus", "schedules": []}),
                &patterns
            )
            .is_err()
        );
        assert!(Condition::parse(RuleType::ScanLimit, &json!({"threshold": -1}), &patterns).is_err());
        assert!(Condition::parse(RuleType::Geo, &json!({"exclude": true}), &patterns).is_err());
        assert!(Condition::parse(RuleType::Language, &Value::Null, &patterns).is_err());
    }

    #[test]
    fn test_geo_match_and_exclude() {
        let geo = GeoInfo {
            country_code: Some("DE".into()),
            country: Some("Germany".into()),
            city: Some("Berlin".into()),
            ..Default::default()
        };
        let de = vec!["de".to_string()];
        assert!(Condition::matches_geo(&de, &[], false, &geo));
        assert!(!Condition::matches_geo(&de, &[], true, &geo));
        assert!(Condition::matches_geo(&[], &["berlin".to_string()], false, &geo));
        assert!(Condition::matches_geo(&["us".to_string()], &[], true, &geo));
    }

    #[test]
    fn test_user_agent_patterns_skip_invalid() {
        let patterns = PatternCache::default();
        let Condition::UserAgent(compiled) = Condition::parse(
            RuleType::UserAgent,
            &json!({"patterns": ["([unclosed", "instagram"]}),
            &patterns,
        )
        .unwrap() else {
            panic!("expected userAgent condition");
        };
        assert_eq!(compiled.len(), 1);
        assert!(Condition::matches_user_agent(&compiled, "Mozilla/5.0 Instagram 300.0"));
        assert!(!Condition::matches_user_agent(&compiled, IPHONE));

        // 失败结果被缓存
        assert!(patterns.get("([unclosed").is_none());
    }

    #[test]
    fn test_language_match() {
        let allowed = vec!["fr".to_string()];
        assert!(Condition::matches_language(&allowed, Some("fr-CA,en;q=0.5")));
        assert!(!Condition::matches_language(&allowed, Some("en-GB")));
        assert!(!Condition::matches_language(&allowed, None));
    }
}
