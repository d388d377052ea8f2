//! Application lifecycle

pub mod lifetime;
pub mod server;

pub use server::run_server;
