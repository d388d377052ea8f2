//! 扫码记录队列
//!
//! 请求路径只做 `try_send`，从不等待；写入失败不会影响已经发出的响应。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::user_agent::parse_user_agent;
use crate::config::AnalyticsConfig;
use crate::services::fingerprint::{VisitorResolution, VisitorService};
use crate::services::fraud::AnomalyMonitor;
use crate::services::geoip::GeoIpProvider;
use crate::storage::backend::retry::{RetryConfig, is_retryable_scan_error, with_retry_if};
use crate::storage::{ScanEvent, ScanStore};

/// 一次已完成跳转决策的扫码
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub job_id: Uuid,
    pub short_link_id: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub visitor_id: String,
    pub scanned_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(short_link_id: i64, visitor_id: impl Into<String>, scanned_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            short_link_id,
            ip: None,
            user_agent: None,
            referrer: None,
            visitor_id: visitor_id.into(),
            scanned_at,
        }
    }
}

/// 已分配唯一性但事件可能尚未落库的访客，保留时间
const SEEN_VISITOR_TTL: Duration = Duration::from_secs(10 * 60);
const SEEN_VISITOR_MAX_CAPACITY: u64 = 100_000;

/// 处理单条扫码任务
///
/// 计数递增在收到任务时立即完成，不等待地理位置解析；
/// 事件写入（地理位置 + UA 解析 + insert）在后台并发进行。
#[derive(Clone)]
pub struct ScanWorker {
    scans: Arc<dyn ScanStore>,
    visitors: VisitorService,
    geo: Option<GeoIpProvider>,
    retry: RetryConfig,
    seen: Cache<(i64, String), DateTime<Utc>>,
    enrich_concurrency: usize,
    max_in_flight: usize,
    anomalies: Option<AnomalyMonitor>,
}

impl ScanWorker {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        geo: Option<GeoIpProvider>,
        config: &AnalyticsConfig,
    ) -> Self {
        Self {
            visitors: VisitorService::new(scans.clone()),
            scans,
            geo,
            retry: RetryConfig {
                max_retries: config.max_retries,
                base_delay_ms: config.base_delay_ms,
                max_delay_ms: config.max_delay_ms,
            },
            seen: Cache::builder()
                .time_to_live(SEEN_VISITOR_TTL)
                .max_capacity(SEEN_VISITOR_MAX_CAPACITY)
                .build(),
            enrich_concurrency: config.enrich_concurrency.max(1),
            max_in_flight: config.queue_capacity.max(1),
            anomalies: None,
        }
    }

    pub fn with_anomaly_monitor(mut self, monitor: AnomalyMonitor) -> Self {
        self.anomalies = Some(monitor);
        self
    }

    /// 递增扫码计数；返回 false 表示进入死信
    pub async fn count(&self, job: &ScanJob) -> bool {
        let scans = &self.scans;
        let incremented = with_retry_if(
            "increment_scan_count",
            self.retry,
            is_retryable_scan_error,
            || scans.increment_scan_count(job.short_link_id, job.scanned_at),
        )
        .await;

        if let Some(monitor) = &self.anomalies {
            monitor.note_scan(job.short_link_id);
        }

        match incremented {
            Ok(()) => true,
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    short_link_id = job.short_link_id,
                    "Dead-lettered scan counter increment: {:#}",
                    e
                );
                false
            }
        }
    }

    /// 按任务到达顺序判断访客唯一性
    ///
    /// 先查进程内记录，覆盖事件尚未落库的同一访客
    pub async fn resolve_visitor(&self, job: &ScanJob) -> VisitorResolution {
        let key = (job.short_link_id, job.visitor_id.clone());
        if let Some(last_seen) = self.seen.get(&key) {
            return VisitorResolution {
                visitor_id: job.visitor_id.clone(),
                is_unique: false,
                last_seen: Some(last_seen),
            };
        }

        let resolution = self
            .visitors
            .resolve_visitor(job.short_link_id, &job.visitor_id)
            .await;
        self.seen.insert(key, job.scanned_at);
        resolution
    }

    /// 由任务构造 ScanEvent（地理位置 + UA 解析）
    pub async fn build_event(&self, job: &ScanJob, visitor: VisitorResolution) -> ScanEvent {
        let geo = match (&self.geo, job.ip.as_deref()) {
            (Some(provider), Some(ip)) => provider.resolve(ip).await,
            _ => Default::default(),
        };
        let parsed = parse_user_agent(job.user_agent.as_deref());

        ScanEvent {
            short_link_id: job.short_link_id,
            ip_address: job.ip.clone(),
            user_agent: job.user_agent.clone(),
            device: parsed.device,
            browser: parsed.browser,
            os: parsed.os,
            referrer: job.referrer.clone(),
            country: geo.country.or(geo.country_code),
            city: geo.city,
            visitor_id: visitor.visitor_id,
            is_unique: visitor.is_unique,
            is_bot: parsed.is_bot,
            scanned_at: job.scanned_at,
        }
    }

    /// 写入扫码事件；返回 false 表示进入死信
    pub async fn record_event(&self, job: ScanJob, visitor: VisitorResolution) -> bool {
        let event = self.build_event(&job, visitor).await;
        let scans = &self.scans;

        let inserted = with_retry_if(
            "record_scan_event",
            self.retry,
            is_retryable_scan_error,
            || scans.insert_scan(&event),
        )
        .await;

        match inserted {
            Ok(()) => {
                trace!(
                    "Scan job {} recorded (unique: {}, bot: {})",
                    job.job_id, event.is_unique, event.is_bot
                );
                true
            }
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    short_link_id = job.short_link_id,
                    "Dead-lettered scan event: {:#}",
                    e
                );
                false
            }
        }
    }
}

/// 有界扫码记录队列 + 后台 worker
pub struct ScanRecorder {
    tx: mpsc::Sender<ScanJob>,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ScanRecorder {
    /// 启动后台 worker，需要在 tokio runtime 内调用
    pub fn start(worker: ScanWorker, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_worker(worker, rx, shutdown.clone()));

        debug!("ScanRecorder started with queue capacity {}", capacity.max(1));
        Self {
            tx,
            shutdown,
            worker: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
        }
    }

    /// 非阻塞入队；队列已满或已关闭时记录死信并返回 false
    pub fn record(&self, job: ScanJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job.job_id,
                    short_link_id = job.short_link_id,
                    "Scan queue full, dead-lettering scan job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job.job_id,
                    short_link_id = job.short_link_id,
                    "Scan queue closed, dead-lettering scan job"
                );
                false
            }
        }
    }

    /// 队列中等待处理的任务数
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// 因队列满或关闭而丢弃的任务数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 停止接收新任务，并在超时内处理完队列中的剩余任务
    ///
    /// 返回 true 表示队列已排空
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        self.shutdown.notify_one();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!("ScanRecorder drained");
                true
            }
            Ok(Err(e)) => {
                error!("ScanRecorder worker panicked: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "ScanRecorder drain timed out after {:?}, {} jobs left",
                    timeout,
                    self.pending()
                );
                false
            }
        }
    }
}

async fn run_worker(worker: ScanWorker, mut rx: mpsc::Receiver<ScanJob>, shutdown: Arc<Notify>) {
    let permits = Arc::new(Semaphore::new(worker.enrich_concurrency));
    let mut in_flight = JoinSet::new();
    let mut closing = false;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified(), if !closing => {
                // 关闭后 recv 仍会返回缓冲区内的任务，直到排空返回 None
                rx.close();
                closing = true;
            }
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = finished {
                    error!("Scan event task failed: {}", e);
                }
            }
            job = rx.recv() => match job {
                Some(job) => {
                    worker.count(&job).await;
                    let visitor = worker.resolve_visitor(&job).await;
                    if in_flight.len() >= worker.max_in_flight {
                        error!(
                            job_id = %job.job_id,
                            short_link_id = job.short_link_id,
                            "Too many scan events in flight, dead-lettering scan event"
                        );
                    } else {
                        let worker = worker.clone();
                        let permits = permits.clone();
                        in_flight.spawn(async move {
                            let _permit = permits.acquire_owned().await;
                            worker.record_event(job, visitor).await;
                        });
                    }
                }
                None => break,
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!("Scan event task failed: {}", e);
        }
    }
    debug!("ScanRecorder worker exited");
}
