//! qrlinker - dynamic QR code redirect engine
//!
//! 一次扫码从短码到最终目标地址的请求路径：
//! 门控（存在 / 过期 / 密码 / 扫码上限）、路由规则、访客指纹、风控评分、
//! UTM 改写与像素中转页，扫码记录在后台异步写入。
//!
//! # Architecture
//! - `services`: 跳转编排与各叶子组件（规则、风控、指纹、地理位置、UTM、像素页）
//! - `storage`: 存储接口与实现（内存 / SeaORM）
//! - `analytics`: 扫码记录队列
//! - `api`: HTTP 接口
//! - `config`: 配置加载
//! - `runtime`: 启动、运行与关闭
//! - `system`: 日志初始化

pub mod analytics;
pub mod api;
pub mod config;
pub mod errors;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
