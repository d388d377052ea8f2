use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::analytics::{ScanRecorder, ScanWorker};
use crate::api::{ComponentInfo, RedirectSettings};
use crate::config::StaticConfig;
use crate::services::fraud::{
    AnomalyAnalyzer, AnomalyMonitor, FraudScorer, MemorySlidingWindow, RateLimiter,
    build_blocklist,
};
use crate::services::{GeoIpProvider, RedirectEngine, RuleEngine};
use crate::storage::StorageFactory;

/// 限流窗口清理间隔
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// 异常巡检间隔，不超过分析窗口
const ANOMALY_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct StartupContext {
    pub engine: Arc<RedirectEngine>,
    pub recorder: Arc<ScanRecorder>,
    pub settings: RedirectSettings,
    pub components: ComponentInfo,
    pub route_prefix: String,
}

/// 准备服务器启动的上下文
/// 包括存储、风控、地理位置、扫码记录队列和跳转引擎
pub async fn prepare_server_startup(config: &StaticConfig) -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let storage = StorageFactory::create(&config.database)
        .await
        .context("Failed to create storage backend")?;
    info!("Using storage backend: {}", storage.backend_name);

    let geoip = GeoIpProvider::new(&config.geoip);
    info!("GeoIP provider: {}", geoip.provider_name());

    let blocklist = build_blocklist(&config.fraud)
        .await
        .context("Failed to initialize IP blocklist")?;
    info!("IP blocklist backend: {}", blocklist.name());

    let fraud = FraudScorer::new(blocklist.clone(), storage.scans.clone(), &config.fraud);

    let window = Arc::new(MemorySlidingWindow::new());
    let rate_limiter = RateLimiter::with_backend(&config.rate_limit, window.clone());
    spawn_rate_limit_sweeper(window, rate_limiter.window());

    let anomalies = AnomalyMonitor::new(AnomalyAnalyzer::new(
        storage.scans.clone(),
        config.analytics.anomaly_window_minutes,
    ));
    spawn_anomaly_monitor(anomalies.clone());

    let worker = ScanWorker::new(storage.scans.clone(), Some(geoip.clone()), &config.analytics)
        .with_anomaly_monitor(anomalies);
    let recorder = Arc::new(ScanRecorder::start(worker, config.analytics.queue_capacity));

    let engine = RedirectEngine::new(storage.links.clone(), RuleEngine::new(Some(geoip.clone())), fraud)
        .with_rate_limiter(rate_limiter)
        .with_recorder(recorder.clone());

    let components = ComponentInfo {
        storage: storage.backend_name.clone(),
        blocklist: blocklist.name().to_string(),
        geoip: Some(geoip.provider_name().to_string()),
    };

    info!("Pre-startup processing completed in {:?}", start_time.elapsed());

    Ok(StartupContext {
        engine: Arc::new(engine),
        recorder,
        settings: RedirectSettings::from_config(&config.redirect),
        components,
        route_prefix: config.redirect.route_prefix.clone(),
    })
}

/// 定期清理过期的限流记录，避免 IP 表无限增长
fn spawn_rate_limit_sweeper(window: Arc<MemorySlidingWindow>, span: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            window.sweep(span);
            debug!("Rate limit sweep done, {} keys tracked", window.tracked_keys());
        }
    });
}

/// 定期巡检最近有扫码的短链接，异常由 AnomalyAnalyzer 记录 warn 日志
fn spawn_anomaly_monitor(monitor: AnomalyMonitor) {
    let window = Duration::from_secs(monitor.window_minutes().max(1) as u64 * 60);
    let period = ANOMALY_CHECK_INTERVAL.min(window);
    debug!("Anomaly checks every {:?}", period);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            monitor.sweep().await;
        }
    });
}
