//! 扫码跳转的业务逻辑
//!
//! 叶子组件（地理位置、指纹、风控、规则、UTM、像素页）由 `resolver` 编排。

pub mod context;
pub mod fingerprint;
pub mod fraud;
pub mod geoip;
pub mod pixel;
pub mod resolver;
pub mod rules;
pub mod utm;

pub use context::RedirectContext;
pub use fingerprint::{VisitorResolution, VisitorService, fingerprint, visitor_id_from};
pub use geoip::{GeoInfo, GeoIpLookup, GeoIpProvider};
pub use resolver::{
    RedirectEngine, RedirectOutcome, Rejection, RejectionKind, ScanRequest,
};
pub use rules::{RuleEngine, RuleEvaluation};
