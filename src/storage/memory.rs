//! In-process storage
//!
//! Backs `database_url = "memory"` and the test suites. Links and their
//! rules are seeded through `insert_link` / `add_rule` / `add_pixel`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::{QrLinkerError, Result};
use crate::storage::{LinkRepository, PixelConfig, RoutingRule, ScanEvent, ScanStore, ShortLink};

#[derive(Default)]
struct Tables {
    links: HashMap<i64, ShortLink>,
    codes: HashMap<String, i64>,
    rules: Vec<RoutingRule>,
    pixels: Vec<PixelConfig>,
    scans: Vec<ScanEvent>,
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 插入短链接，返回分配的 id
    pub fn insert_link(&self, mut link: ShortLink) -> Result<i64> {
        if !crate::utils::is_valid_short_code(&link.code) {
            return Err(QrLinkerError::validation(format!(
                "非法短码: {}",
                link.code
            )));
        }

        let mut tables = self.tables.write();
        if tables.codes.contains_key(&link.code) {
            return Err(QrLinkerError::validation(format!(
                "短码已存在: {}",
                link.code
            )));
        }

        let id = self.allocate_id();
        link.id = id;
        tables.codes.insert(link.code.clone(), id);
        tables.links.insert(id, link);
        Ok(id)
    }

    pub fn add_rule(&self, short_link_id: i64, mut rule: RoutingRule) -> i64 {
        rule.id = self.allocate_id();
        rule.short_link_id = short_link_id;
        let id = rule.id;
        self.tables.write().rules.push(rule);
        id
    }

    pub fn add_pixel(&self, short_link_id: i64, mut pixel: PixelConfig) -> i64 {
        pixel.id = self.allocate_id();
        pixel.short_link_id = short_link_id;
        let id = pixel.id;
        self.tables.write().pixels.push(pixel);
        id
    }

    /// 读取链接当前状态（含计数）
    pub fn link(&self, short_link_id: i64) -> Option<ShortLink> {
        self.tables.read().links.get(&short_link_id).cloned()
    }

    pub fn scans(&self) -> Vec<ScanEvent> {
        self.tables.read().scans.clone()
    }
}

#[async_trait]
impl LinkRepository for MemoryStorage {
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        let tables = self.tables.read();
        Ok(tables
            .codes
            .get(code)
            .and_then(|id| tables.links.get(id))
            .filter(|link| link.is_active)
            .cloned())
    }

    async fn active_rules(&self, short_link_id: i64) -> Result<Vec<RoutingRule>> {
        let mut rules: Vec<RoutingRule> = self
            .tables
            .read()
            .rules
            .iter()
            .filter(|r| r.short_link_id == short_link_id && r.is_active)
            .cloned()
            .collect();
        // 稳定排序，同优先级保持录入顺序
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn active_pixels(&self, short_link_id: i64) -> Result<Vec<PixelConfig>> {
        Ok(self
            .tables
            .read()
            .pixels
            .iter()
            .filter(|p| p.short_link_id == short_link_id && p.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanStore for MemoryStorage {
    async fn insert_scan(&self, event: &ScanEvent) -> anyhow::Result<()> {
        self.tables.write().scans.push(event.clone());
        Ok(())
    }

    async fn increment_scan_count(
        &self,
        short_link_id: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write();
        let link = tables
            .links
            .get_mut(&short_link_id)
            .ok_or_else(|| anyhow::anyhow!("short link {} not found", short_link_id))?;
        link.scan_count += 1;
        link.last_scanned_at = Some(at);
        Ok(())
    }

    async fn last_visit(
        &self,
        short_link_id: i64,
        visitor_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .tables
            .read()
            .scans
            .iter()
            .filter(|s| s.short_link_id == short_link_id && s.visitor_id == visitor_id)
            .map(|s| s.scanned_at)
            .max())
    }

    async fn count_scans_from_ip(
        &self,
        short_link_id: i64,
        ip: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        Ok(self
            .tables
            .read()
            .scans
            .iter()
            .filter(|s| {
                s.short_link_id == short_link_id
                    && s.ip_address.as_deref() == Some(ip)
                    && s.scanned_at >= since
            })
            .count() as u64)
    }

    async fn scans_since(
        &self,
        short_link_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ScanEvent>> {
        Ok(self
            .tables
            .read()
            .scans
            .iter()
            .filter(|s| s.short_link_id == short_link_id && s.scanned_at >= since)
            .cloned()
            .collect())
    }
}
