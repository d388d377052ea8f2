pub mod args;
mod r#impl;
mod structs;

pub use args::Args;
pub use r#impl::{DEFAULT_CONFIG_PATH, get_config, init_config};
pub use structs::*;
