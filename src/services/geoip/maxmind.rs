//! MaxMind GeoLite2 数据库实现
//!
//! 使用本地 MaxMind GeoLite2-City.mmdb 文件进行 IP 地理位置查询

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use maxminddb::Reader;
use tracing::trace;

use super::provider::{GeoError, GeoInfo, GeoIpLookup};

/// MaxMind GeoIP Provider
pub struct MaxMindProvider {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindProvider {
    /// 从文件路径创建 MaxMind Provider
    pub fn new(path: &str) -> Result<Self, maxminddb::MaxMindDbError> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl GeoIpLookup for MaxMindProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, GeoError> {
        let result = self
            .reader
            .lookup(ip)
            .map_err(|e| GeoError::Database(e.to_string()))?;

        // 库中没有该网段 → Unknown
        let Some(city) = result
            .decode::<maxminddb::geoip2::City>()
            .map_err(|e| GeoError::Decode(e.to_string()))?
        else {
            return Ok(GeoInfo::unknown());
        };

        let info = GeoInfo {
            country_code: city.country.iso_code.map(String::from),
            country: city.country.names.english.map(String::from),
            city: city.city.names.english.map(String::from),
            latitude: city.location.latitude,
            longitude: city.location.longitude,
        };

        trace!(
            "MaxMind lookup for {}: country={:?}, city={:?}",
            ip, info.country_code, info.city
        );
        Ok(info)
    }

    fn name(&self) -> &'static str {
        "MaxMind"
    }
}
