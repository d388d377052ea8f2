//! 启动与关闭

pub mod shutdown;
pub mod startup;

pub use startup::{StartupContext, prepare_server_startup};
