//! 扫码异常分析（仅用于告警与看板，不拦截）

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use strum::AsRefStr;
use tracing::{debug, warn};

use crate::storage::{ScanEvent, ScanStore};

pub const MAX_SCANS_PER_MINUTE: f64 = 100.0;
pub const MAX_BOT_PERCENTAGE: f64 = 50.0;
pub const SCAN_FARM_MIN_SCANS: usize = 100;
pub const SCAN_FARM_MAX_IPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyFlag {
    HighScanRate,
    HighBotPercentage,
    ScanFarm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub short_link_id: i64,
    pub window_minutes: i64,
    pub total_scans: usize,
    pub unique_ips: usize,
    pub scans_per_minute: f64,
    pub bot_percentage: f64,
    pub flags: Vec<AnomalyFlag>,
}

impl AnomalyReport {
    pub fn is_anomalous(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// 对窗口内的扫码做统计
pub fn analyze_scans(short_link_id: i64, window_minutes: i64, scans: &[ScanEvent]) -> AnomalyReport {
    let total = scans.len();
    let unique_ips = scans
        .iter()
        .filter_map(|s| s.ip_address.as_deref())
        .collect::<HashSet<_>>()
        .len();
    let bots = scans.iter().filter(|s| s.is_bot).count();

    let scans_per_minute = total as f64 / window_minutes.max(1) as f64;
    let bot_percentage = if total == 0 {
        0.0
    } else {
        bots as f64 * 100.0 / total as f64
    };

    let mut flags = Vec::new();
    if scans_per_minute > MAX_SCANS_PER_MINUTE {
        flags.push(AnomalyFlag::HighScanRate);
    }
    if bot_percentage > MAX_BOT_PERCENTAGE {
        flags.push(AnomalyFlag::HighBotPercentage);
    }
    if total > SCAN_FARM_MIN_SCANS && unique_ips < SCAN_FARM_MAX_IPS {
        flags.push(AnomalyFlag::ScanFarm);
    }

    AnomalyReport {
        short_link_id,
        window_minutes,
        total_scans: total,
        unique_ips,
        scans_per_minute,
        bot_percentage,
        flags,
    }
}

#[derive(Clone)]
pub struct AnomalyAnalyzer {
    scans: Arc<dyn ScanStore>,
    window_minutes: i64,
}

impl AnomalyAnalyzer {
    pub fn new(scans: Arc<dyn ScanStore>, window_minutes: i64) -> Self {
        Self {
            scans,
            window_minutes: window_minutes.max(1),
        }
    }

    pub async fn analyze(&self, short_link_id: i64) -> anyhow::Result<AnomalyReport> {
        self.analyze_at(short_link_id, Utc::now()).await
    }

    pub async fn analyze_at(
        &self,
        short_link_id: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AnomalyReport> {
        let since = now - Duration::minutes(self.window_minutes);
        let scans = self.scans.scans_since(short_link_id, since).await?;
        let report = analyze_scans(short_link_id, self.window_minutes, &scans);
        if report.is_anomalous() {
            warn!(
                "Link {} looks anomalous: {:?} ({} scans, {} IPs)",
                short_link_id,
                report.flags,
                report.total_scans,
                report.unique_ips
            );
        }
        Ok(report)
    }

    pub fn window_minutes(&self) -> i64 {
        self.window_minutes
    }
}

/// 巡检自上次巡检以来有扫码的短链接
#[derive(Clone)]
pub struct AnomalyMonitor {
    analyzer: AnomalyAnalyzer,
    active: Arc<Mutex<BTreeSet<i64>>>,
}

impl AnomalyMonitor {
    pub fn new(analyzer: AnomalyAnalyzer) -> Self {
        Self {
            analyzer,
            active: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn note_scan(&self, short_link_id: i64) {
        self.active.lock().insert(short_link_id);
    }

    /// 分析并清空待巡检的短链接，返回异常报告
    pub async fn sweep(&self) -> Vec<AnomalyReport> {
        let links = std::mem::take(&mut *self.active.lock());
        if links.is_empty() {
            return Vec::new();
        }

        let mut anomalous = Vec::new();
        for short_link_id in &links {
            match self.analyzer.analyze(*short_link_id).await {
                Ok(report) if report.is_anomalous() => anomalous.push(report),
                Ok(_) => {}
                Err(e) => warn!("Anomaly check for link {} failed: {}", short_link_id, e),
            }
        }
        debug!(
            "Anomaly sweep checked {} links, {} anomalous",
            links.len(),
            anomalous.len()
        );
        anomalous
    }

    pub fn pending(&self) -> usize {
        self.active.lock().len()
    }

    pub fn window_minutes(&self) -> i64 {
        self.analyzer.window_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, ShortLink};

    fn scan(ip: &str, is_bot: bool) -> ScanEvent {
        ScanEvent {
            short_link_id: 1,
            ip_address: Some(ip.to_string()),
            user_agent: None,
            device: None,
            browser: None,
            os: None,
            referrer: None,
            country: None,
            city: None,
            visitor_id: "v".to_string(),
            is_unique: false,
            is_bot,
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn test_quiet_link_is_clean() {
        let scans: Vec<ScanEvent> = (0..20).map(|i| scan(&format!("10.0.0.{}", i), false)).collect();
        let report = analyze_scans(1, 60, &scans);
        assert!(!report.is_anomalous());
        assert_eq!(report.unique_ips, 20);
    }

    #[test]
    fn test_scan_farm() {
        let scans: Vec<ScanEvent> = (0..101).map(|i| scan(&format!("10.0.0.{}", i % 4), false)).collect();
        let report = analyze_scans(1, 60, &scans);
        assert_eq!(report.flags, vec![AnomalyFlag::ScanFarm]);

        // 恰好 100 次不算
        let scans: Vec<ScanEvent> = (0..100).map(|i| scan(&format!("10.0.0.{}", i % 4), false)).collect();
        assert!(!analyze_scans(1, 60, &scans).is_anomalous());
    }

    #[test]
    fn test_bot_share() {
        let mut scans: Vec<ScanEvent> = (0..6).map(|i| scan(&format!("10.0.1.{}", i), true)).collect();
        scans.extend((0..4).map(|i| scan(&format!("10.0.2.{}", i), false)));
        let report = analyze_scans(1, 60, &scans);
        assert_eq!(report.bot_percentage, 60.0);
        assert!(report.flags.contains(&AnomalyFlag::HighBotPercentage));
    }

    #[test]
    fn test_rate_per_minute() {
        let scans: Vec<ScanEvent> = (0..101).map(|i| scan(&format!("10.{}.0.1", i), false)).collect();
        let report = analyze_scans(1, 1, &scans);
        assert!(report.flags.contains(&AnomalyFlag::HighScanRate));
        assert!(!report.flags.contains(&AnomalyFlag::ScanFarm));
    }

    #[tokio::test]
    async fn test_monitor_sweeps_noted_links_once() {
        let storage = Arc::new(MemoryStorage::new());
        let farmed = storage
            .insert_link(ShortLink::new("farmed", "https://example.com"))
            .unwrap();
        let quiet = storage
            .insert_link(ShortLink::new("quiet", "https://example.com"))
            .unwrap();
        for i in 0..101 {
            let mut event = scan(&format!("10.0.0.{}", i % 2), false);
            event.short_link_id = farmed;
            storage.insert_scan(&event).await.unwrap();
        }
        let mut event = scan("10.9.9.9", false);
        event.short_link_id = quiet;
        storage.insert_scan(&event).await.unwrap();

        let monitor = AnomalyMonitor::new(AnomalyAnalyzer::new(storage, 60));
        monitor.note_scan(farmed);
        monitor.note_scan(quiet);
        monitor.note_scan(farmed);
        assert_eq!(monitor.pending(), 2);

        let reports = monitor.sweep().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].short_link_id, farmed);
        assert_eq!(reports[0].flags, vec![AnomalyFlag::ScanFarm]);

        // 已巡检的链接被清空，直到再次有扫码
        assert_eq!(monitor.pending(), 0);
        assert!(monitor.sweep().await.is_empty());
    }
}
