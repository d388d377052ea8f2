//! Server mode
//!
//! 启动 HTTP 服务：扫码跳转 + 健康检查。

use actix_web::{
    App, HttpServer,
    middleware::{Compress, DefaultHeaders},
    web,
};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

use crate::api::{AppStartTime, health_routes, redirect_routes};
use crate::config::StaticConfig;
use crate::runtime::lifetime;

/// Run the HTTP server
///
/// This function:
/// 1. Records startup time
/// 2. Prepares server components (storage, fraud, geoip, scan recorder)
/// 3. Configures and starts the HTTP server
/// 4. Drains the scan queue on Ctrl+C
///
/// **Note**: Logging system must be initialized before calling this function
pub async fn run_server(config: &StaticConfig) -> Result<()> {
    let app_start_time = AppStartTime {
        start_datetime: chrono::Utc::now(),
    };

    let startup = lifetime::prepare_server_startup(config)
        .await
        .inspect_err(|e| tracing::error!("Server startup failed: {:#}", e))?;

    let engine = startup.engine.clone();
    let settings = startup.settings.clone();
    let components = startup.components.clone();
    let route_prefix = startup.route_prefix.clone();
    let recorder = startup.recorder.clone();

    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    if config.redirect.trusted_proxies.is_empty() {
        warn!(
            "Client IP: auto-detect mode. Connections from private IPs will use X-Forwarded-For. \
             Configure redirect.trusted_proxies explicitly to disable."
        );
    } else {
        warn!(
            "Client IP: trusted proxies configured: {:?}",
            config.redirect.trusted_proxies
        );
    }

    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("Connection", "keep-alive"))
                    .add(("Keep-Alive", "timeout=30, max=1000")),
            )
            .app_data(web::Data::new(engine.clone()))
            .app_data(web::Data::new(settings.clone()))
            .app_data(web::Data::new(components.clone()))
            .app_data(web::Data::new(app_start_time.clone()))
            .service(health_routes())
            .service(redirect_routes(&route_prefix))
    })
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_millis(5000))
    .client_disconnect_timeout(Duration::from_millis(1000))
    .workers(cpu_count)
    .disable_signals()
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?;

    warn!("Starting server at http://{}", bind_address);
    let server = server.run();
    let handle = server.handle();

    // Wait for server or shutdown signal
    tokio::select! {
        res = server => {
            res?;
        }
        _ = lifetime::shutdown::listen_for_shutdown() => {
            handle.stop(true).await;
            lifetime::shutdown::drain_recorder(
                &recorder,
                Duration::from_secs(lifetime::shutdown::DRAIN_TIMEOUT_SECS),
            )
            .await;
            warn!("Graceful shutdown: all tasks completed");
        }
    }

    Ok(())
}
