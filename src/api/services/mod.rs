pub mod health;
pub mod redirect;

pub use health::{AppStartTime, ComponentInfo, HealthService, health_routes};
pub use redirect::{RedirectService, RedirectSettings, redirect_routes};
