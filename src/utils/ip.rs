//! IP 地址处理工具
//!
//! 提供统一的客户端 IP 提取功能，支持：
//! - 可信代理配置（trusted_proxies）
//! - CIDR 匹配（黑名单网段也复用）
//! - 私有 IP 自动检测

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use actix_web::HttpRequest;
use actix_web::dev::ConnectionInfo;
use tracing::debug;

/// 检查 IP 是否为私有地址或 localhost
pub fn is_private_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

/// 已解析的网段；单个 IP 视为 /32 或 /128
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (ip, self.network) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => {
                let mask = u32::MAX
                    .checked_shl(32 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u32::from_be_bytes(ip.octets()) & mask) == (u32::from_be_bytes(net.octets()) & mask)
            }
            (IpAddr::V6(ip), IpAddr::V6(net)) => {
                let mask = u128::MAX
                    .checked_shl(128 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u128::from_be_bytes(ip.octets()) & mask)
                    == (u128::from_be_bytes(net.octets()) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (network, prefix) = match s.split_once('/') {
            Some((net, prefix)) => (net, Some(prefix)),
            None => (s, None),
        };

        let network: IpAddr = network
            .parse()
            .map_err(|_| format!("invalid network address: {}", s))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= max)
                .ok_or_else(|| format!("invalid prefix length: {}", s))?,
            None => max,
        };

        Ok(Cidr {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// 解析网段列表，非法项被跳过
pub fn parse_cidrs(entries: &[String]) -> Vec<Cidr> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<Cidr>() {
            Ok(cidr) => Some(cidr),
            Err(e) => {
                tracing::warn!("Ignoring network entry: {}", e);
                None
            }
        })
        .collect()
}

/// 解析 `ip` 或 `ip:port`
pub fn parse_peer_ip(peer: &str) -> Option<IpAddr> {
    peer.parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .or_else(|_| peer.parse::<IpAddr>())
        .ok()
}

/// 检查 IP 是否在可信代理列表中
pub fn is_trusted_proxy(peer: &str, trusted_proxies: &[Cidr]) -> bool {
    parse_peer_ip(peer).is_some_and(|ip| trusted_proxies.iter().any(|net| net.contains(&ip)))
}

/// 从 ConnectionInfo 提取真实客户端 IP
///
/// 策略（按优先级）：
/// 1. 配置了 trusted_proxies 且连接来自其中 → 使用 X-Forwarded-For
/// 2. 配置了但不匹配 → 使用连接 IP，不信任转发头
/// 3. 未配置且连接来自私有 IP → 视为反向代理，使用 X-Forwarded-For
/// 4. 默认 → 使用连接 IP
pub fn extract_client_ip_from_conn_info<F>(
    conn_info: &ConnectionInfo,
    trusted_proxies: &[Cidr],
    get_forwarded_ip: F,
) -> Option<String>
where
    F: FnOnce() -> Option<String>,
{
    let peer = conn_info.peer_addr()?;
    let peer_ip = parse_peer_ip(peer).map(|ip| ip.to_string())?;

    if !trusted_proxies.is_empty() {
        if is_trusted_proxy(peer, trusted_proxies) {
            let real_ip = get_forwarded_ip().unwrap_or_else(|| peer_ip.clone());
            debug!("Trusted proxy (explicit): {} -> {}", peer_ip, real_ip);
            return Some(real_ip);
        }
        return Some(peer_ip);
    }

    if let Ok(ip_addr) = peer_ip.parse::<IpAddr>()
        && is_private_or_local(&ip_addr)
        && let Some(real_ip) = get_forwarded_ip()
    {
        debug!(
            "Auto-detect proxy (private IP {}): using X-Forwarded-For: {}",
            peer_ip, real_ip
        );
        return Some(real_ip);
    }

    Some(peer_ip)
}

/// 从 HttpRequest 提取真实客户端 IP
pub fn extract_client_ip(req: &HttpRequest, trusted_proxies: &[Cidr]) -> Option<String> {
    extract_client_ip_from_conn_info(&req.connection_info(), trusted_proxies, || {
        extract_forwarded_ip_from_headers(req.headers())
    })
}

/// 从 HeaderMap 提取转发的 IP（X-Forwarded-For 第一个，其次 X-Real-IP）
pub fn extract_forwarded_ip_from_headers(
    headers: &actix_web::http::header::HeaderMap,
) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| parse_peer_ip(s).is_some())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| parse_peer_ip(s).is_some())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_is_private_or_local() {
        assert!(is_private_or_local(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"192.168.1.1".parse().unwrap()));
        assert!(is_private_or_local(&"127.0.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"::1".parse().unwrap()));
        assert!(is_private_or_local(&"fd00::1".parse().unwrap()));
        assert!(!is_private_or_local(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_or_local(
            &"2001:4860:4860::8888".parse().unwrap()
        ));
    }

    #[test]
    fn test_cidr_contains() {
        let net: Cidr = "192.168.1.0/24".parse().unwrap();
        assert!(net.contains(&"192.168.1.100".parse().unwrap()));
        assert!(!net.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));

        let v6: Cidr = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains(&"2001:db8::1".parse().unwrap()));

        let single: Cidr = "10.0.0.1".parse().unwrap();
        assert_eq!(single.to_string(), "10.0.0.1/32");
        assert!(single.contains(&"10.0.0.1".parse().unwrap()));
        assert!(!single.contains(&"10.0.0.2".parse().unwrap()));

        let everything: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(&"203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("not-an-ip".parse::<Cidr>().is_err());
        let parsed = parse_cidrs(&["10.0.0.0/8".to_string(), "bogus".to_string()]);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_is_trusted_proxy() {
        let proxies = parse_cidrs(&["127.0.0.1".to_string(), "192.168.1.0/24".to_string()]);
        assert!(is_trusted_proxy("127.0.0.1", &proxies));
        assert!(is_trusted_proxy("127.0.0.1:8080", &proxies));
        assert!(is_trusted_proxy("192.168.1.50", &proxies));
        assert!(!is_trusted_proxy("8.8.8.8", &proxies));
    }

    #[test]
    fn test_forwarded_header_ignored_for_untrusted_peer() {
        let proxies = parse_cidrs(&["10.0.0.0/8".to_string()]);
        let req = TestRequest::default()
            .peer_addr("203.0.113.5:4000".parse().unwrap())
            .insert_header(("x-forwarded-for", "1.2.3.4"))
            .to_http_request();
        assert_eq!(
            extract_client_ip(&req, &proxies).as_deref(),
            Some("203.0.113.5")
        );
    }

    #[test]
    fn test_forwarded_header_used_for_trusted_peer() {
        let proxies = parse_cidrs(&["10.0.0.0/8".to_string()]);
        let req = TestRequest::default()
            .peer_addr("10.1.2.3:4000".parse().unwrap())
            .insert_header(("x-forwarded-for", "1.2.3.4, 10.1.2.3"))
            .to_http_request();
        assert_eq!(extract_client_ip(&req, &proxies).as_deref(), Some("1.2.3.4"));
    }
}
