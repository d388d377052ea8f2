//! GeoIP 服务模块
//!
//! 提供 IP 地址地理位置查询功能，支持：
//! - MaxMind GeoLite2 本地数据库
//! - 外部 HTTP API（主 + 备用）
//!
//! 查询失败时返回 Unknown，不会向调用方传播错误

mod external_api;
mod maxmind;
mod provider;

pub use external_api::{ExternalApiProvider, parse_geo_json};
pub use maxmind::MaxMindProvider;
pub use provider::{GeoError, GeoInfo, GeoIpLookup, GeoIpProvider};
