//! 扫码副作用
//!
//! 跳转决策完成后，扫码记录通过有界队列交给后台 worker：
//! - 计数递增（收到任务即执行，不等待地理位置）
//! - 访客唯一性判断（按到达顺序）
//! - 地理位置解析与 ScanEvent 写入（有界并发）
//!
//! 写入带重试，失败进入死信日志。

pub mod recorder;
pub mod user_agent;

pub use recorder::{ScanJob, ScanRecorder, ScanWorker};
pub use user_agent::{ParsedUserAgent, parse_user_agent};
