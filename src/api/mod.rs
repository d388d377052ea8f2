//! HTTP 接口：扫码跳转与健康检查

pub mod services;

pub use services::{
    AppStartTime, ComponentInfo, RedirectService, RedirectSettings, health_routes,
    redirect_routes,
};
