//! 外部 GeoIP API 实现
//!
//! 使用外部 HTTP API 进行 IP 地理位置查询（ip-api.com、ipwho.is 等）。
//! ureq 为同步客户端，请求在 spawn_blocking 中执行。

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};
use ureq::Agent;

use super::provider::{GeoError, GeoInfo, GeoIpLookup};

/// 外部 API GeoIP Provider
pub struct ExternalApiProvider {
    api_url_template: String,
    agent: Agent,
}

impl ExternalApiProvider {
    /// `api_url_template` 使用 `{ip}` 作为占位符
    /// 例如: `http://ip-api.com/json/{ip}?fields=status,country,countryCode,city,lat,lon`
    pub fn new(api_url_template: &str, timeout: Duration) -> Self {
        // 非 2xx 按软失败处理，不让 ureq 转成 Err
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            api_url_template: api_url_template.to_string(),
            agent,
        }
    }

    fn fetch_sync(agent: &Agent, url: &str) -> Result<GeoInfo, GeoError> {
        let resp = agent
            .get(url)
            .call()
            .map_err(|e| GeoError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            warn!("GeoIP API \"{}\" answered {}", url, resp.status());
            return Ok(GeoInfo::unknown());
        }

        let json: serde_json::Value = resp
            .into_body()
            .read_json()
            .map_err(|e| GeoError::Decode(e.to_string()))?;

        Ok(parse_geo_json(&json))
    }
}

/// 解析常见 GeoIP API 响应
///
/// - ip-api.com: `{"status":"success","country":"..","countryCode":"..","city":"..","lat":..,"lon":..}`
/// - ipwho.is: `{"success":true,"country":"..","country_code":"..","city":"..","latitude":..,"longitude":..}`
///
/// `status: fail` / `success: false` 返回 Unknown
pub fn parse_geo_json(json: &serde_json::Value) -> GeoInfo {
    if json["status"].as_str() == Some("fail") || json["success"].as_bool() == Some(false) {
        trace!("External API returned fail status");
        return GeoInfo::unknown();
    }

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| json[*k].as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let number = |keys: &[&str]| keys.iter().find_map(|k| json[*k].as_f64());

    let country_code = text(&["countryCode", "country_code"]);
    // 部分 API 的 country 字段本身就是代码
    let country = text(&["country", "country_name"]);

    GeoInfo {
        country_code: country_code.or_else(|| country.clone().filter(|c| c.len() == 2)),
        country,
        city: text(&["city"]),
        latitude: number(&["lat", "latitude"]),
        longitude: number(&["lon", "longitude"]),
    }
}

#[async_trait]
impl GeoIpLookup for ExternalApiProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        let url = self.api_url_template.replace("{ip}", &ip.to_string());
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || Self::fetch_sync(&agent, &url))
            .await
            .map_err(|e| GeoError::Transport(format!("spawn_blocking failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "ExternalAPI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ip_api_success() {
        let info = parse_geo_json(&json!({
            "status": "success",
            "country": "Germany",
            "countryCode": "DE",
            "city": "Berlin",
            "lat": 52.52,
            "lon": 13.405
        }));
        assert_eq!(info.country_code.as_deref(), Some("DE"));
        assert_eq!(info.country.as_deref(), Some("Germany"));
        assert_eq!(info.city.as_deref(), Some("Berlin"));
        assert_eq!(info.latitude, Some(52.52));
    }

    #[test]
    fn test_parse_ipwhois_shape() {
        let info = parse_geo_json(&json!({
            "success": true,
            "country": "Japan",
            "country_code": "JP",
            "city": "Tokyo",
            "latitude": 35.68,
            "longitude": 139.69
        }));
        assert_eq!(info.country_code.as_deref(), Some("JP"));
        assert_eq!(info.longitude, Some(139.69));
    }

    #[test]
    fn test_parse_fail_status_is_unknown() {
        assert!(parse_geo_json(&json!({"status": "fail", "message": "private range"})).is_unknown());
        assert!(parse_geo_json(&json!({"success": false})).is_unknown());
    }

    #[test]
    fn test_parse_bare_country_code() {
        let info = parse_geo_json(&json!({"country": "US"}));
        assert_eq!(info.country_code.as_deref(), Some("US"));
    }

    /// 依赖外部网络服务，CI 环境可能失败
    #[tokio::test]
    #[ignore]
    async fn test_external_api_provider_lookup() {
        let provider = ExternalApiProvider::new(
            "http://ip-api.com/json/{ip}?fields=status,country,countryCode,city,lat,lon",
            Duration::from_secs(3),
        );
        let info = provider.lookup("8.8.8.8".parse().unwrap()).await.unwrap();
        assert_eq!(info.country_code.as_deref(), Some("US"));
    }

    /// 不可路由地址，应在超时后返回传输错误
    #[tokio::test]
    #[ignore]
    async fn test_unroutable_endpoint_is_hard_failure() {
        let provider =
            ExternalApiProvider::new("http://192.0.2.1/{ip}", Duration::from_millis(300));
        let result = provider.lookup("8.8.8.8".parse().unwrap()).await;
        assert!(matches!(result, Err(GeoError::Transport(_))));
    }
}
