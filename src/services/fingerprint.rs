//! 访客指纹
//!
//! 指纹 = SHA-256("ip|ua|accept-language|accept-encoding") 的前 32 个十六进制字符。
//! 拼接顺序和分隔符需与 cookie 中存储的历史值保持一致，不可更改。

use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::storage::ScanStore;

/// 访客 ID 长度（十六进制字符）
pub const VISITOR_ID_LEN: usize = 32;

/// 计算访客指纹，缺失项按空字符串处理
pub fn fingerprint(
    ip: Option<&str>,
    user_agent: Option<&str>,
    accept_language: Option<&str>,
    accept_encoding: Option<&str>,
) -> String {
    let joined = [ip, user_agent, accept_language, accept_encoding]
        .map(|part| part.unwrap_or(""))
        .join("|");
    let digest = Sha256::digest(joined.as_bytes());

    let mut hex = String::with_capacity(VISITOR_ID_LEN);
    for byte in digest.iter().take(VISITOR_ID_LEN / 2) {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// cookie 中的访客 ID 是否格式正确（32 位小写十六进制）
pub fn is_valid_visitor_id(value: &str) -> bool {
    value.len() == VISITOR_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// cookie 优先，否则用请求信号重新计算
pub fn visitor_id_from(
    cookie: Option<&str>,
    ip: Option<&str>,
    user_agent: Option<&str>,
    accept_language: Option<&str>,
    accept_encoding: Option<&str>,
) -> String {
    match cookie {
        Some(id) if is_valid_visitor_id(id) => id.to_string(),
        _ => fingerprint(ip, user_agent, accept_language, accept_encoding),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitorResolution {
    pub visitor_id: String,
    pub is_unique: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// 判断访客对某个短链接是否为首次扫码
#[derive(Clone)]
pub struct VisitorService {
    scans: Arc<dyn ScanStore>,
}

impl VisitorService {
    pub fn new(scans: Arc<dyn ScanStore>) -> Self {
        Self { scans }
    }

    /// 查询失败时按首次访问处理
    pub async fn resolve_visitor(&self, short_link_id: i64, visitor_id: &str) -> VisitorResolution {
        let last_seen = match self.scans.last_visit(short_link_id, visitor_id).await {
            Ok(last) => last,
            Err(e) => {
                warn!(
                    "Visitor lookup failed for link {}: {}, treating as unique",
                    short_link_id, e
                );
                None
            }
        };

        VisitorResolution {
            visitor_id: visitor_id.to_string(),
            is_unique: last_seen.is_none(),
            last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, ScanEvent, ShortLink};

    const UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(Some("203.0.113.7"), Some(UA), Some("en-US"), Some("gzip"));
        let b = fingerprint(Some("203.0.113.7"), Some(UA), Some("en-US"), Some("gzip"));
        assert_eq!(a, b);
        assert_eq!(a.len(), VISITOR_ID_LEN);
        assert!(is_valid_visitor_id(&a));
    }

    #[test]
    fn test_fingerprint_changes_with_each_input() {
        let base = fingerprint(Some("203.0.113.7"), Some(UA), Some("en-US"), Some("gzip"));
        for changed in [
            fingerprint(Some("203.0.113.8"), Some(UA), Some("en-US"), Some("gzip")),
            fingerprint(Some("203.0.113.7"), Some("curl/8.0"), Some("en-US"), Some("gzip")),
            fingerprint(Some("203.0.113.7"), Some(UA), Some("de-DE"), Some("gzip")),
            fingerprint(Some("203.0.113.7"), Some(UA), Some("en-US"), Some("br")),
        ] {
            assert_ne!(base, changed);
        }
    }

    #[test]
    fn test_missing_parts_are_empty_strings() {
        // SHA-256("|||") 的前 16 字节
        let digest = Sha256::digest(b"|||");
        let expected: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(fingerprint(None, None, None, None), expected);
        assert_eq!(
            fingerprint(None, None, None, None),
            fingerprint(Some(""), Some(""), Some(""), Some(""))
        );
    }

    #[test]
    fn test_cookie_takes_precedence_when_well_formed() {
        let cookie = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            visitor_id_from(Some(cookie), Some("1.1.1.1"), Some(UA), None, None),
            cookie
        );

        let computed = fingerprint(Some("1.1.1.1"), Some(UA), None, None);
        assert_eq!(
            visitor_id_from(Some("not-a-visitor-id"), Some("1.1.1.1"), Some(UA), None, None),
            computed
        );
        assert_eq!(
            visitor_id_from(
                Some("0123456789ABCDEF0123456789ABCDEF"),
                Some("1.1.1.1"),
                Some(UA),
                None,
                None
            ),
            computed
        );
    }

    #[tokio::test]
    async fn test_second_resolution_is_not_unique() {
        let storage = Arc::new(MemoryStorage::new());
        let link_id = storage
            .insert_link(ShortLink::new("visit", "https://example.com"))
            .unwrap();
        let service = VisitorService::new(storage.clone());
        let visitor = fingerprint(Some("1.1.1.1"), Some(UA), None, None);

        let first = service.resolve_visitor(link_id, &visitor).await;
        assert!(first.is_unique);
        assert!(first.last_seen.is_none());

        let now = Utc::now();
        storage
            .insert_scan(&ScanEvent {
                short_link_id: link_id,
                ip_address: Some("1.1.1.1".into()),
                user_agent: Some(UA.into()),
                device: None,
                browser: None,
                os: None,
                referrer: None,
                country: None,
                city: None,
                visitor_id: visitor.clone(),
                is_unique: true,
                is_bot: false,
                scanned_at: now,
            })
            .await
            .unwrap();

        let second = service.resolve_visitor(link_id, &visitor).await;
        assert!(!second.is_unique);
        assert_eq!(second.last_seen, Some(now));
    }
}
