use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use crate::analytics::ScanRecorder;

/// 扫码队列排空超时时间（秒）
pub const DRAIN_TIMEOUT_SECS: u64 = 10;

pub async fn listen_for_shutdown() {
    // 等待 Ctrl+C 信号
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping server...");
        }
        Err(e) => {
            warn!(
                "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
                e
            );
        }
    }
}

/// 停止接收扫码任务并在超时内写完剩余任务
pub async fn drain_recorder(recorder: &ScanRecorder, timeout: Duration) {
    let pending = recorder.pending();
    if recorder.shutdown(timeout).await {
        info!("Scan queue drained ({} pending at shutdown)", pending);
    } else {
        warn!(
            "Scan queue not fully drained, {} jobs dropped during run",
            recorder.dropped()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{ScanJob, ScanWorker};
    use crate::config::AnalyticsConfig;
    use crate::storage::{MemoryStorage, ShortLink};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drain_writes_pending_jobs() {
        let storage = Arc::new(MemoryStorage::new());
        let id = storage
            .insert_link(ShortLink::new("drain", "https://example.com"))
            .unwrap();
        let worker = ScanWorker::new(storage.clone(), None, &AnalyticsConfig::default());
        let recorder = ScanRecorder::start(worker, 8);
        for i in 0..3 {
            recorder.record(ScanJob::new(id, format!("{:032x}", i), chrono::Utc::now()));
        }

        drain_recorder(&recorder, Duration::from_secs(5)).await;
        assert_eq!(storage.scans().len(), 3);
    }
}
