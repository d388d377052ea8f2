//! Persistence collaborators
//!
//! The redirect engine consumes storage through two narrow traits:
//! - `LinkRepository`: link / rule / pixel lookup on the request path
//! - `ScanStore`: scan history reads and fire-and-forget writes

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

pub mod backend;
pub mod memory;
pub mod models;

pub use backend::SeaOrmStorage;
pub use memory::MemoryStorage;
pub use models::{
    MAX_REDIRECT_DELAY_MS, PixelConfig, PixelProvider, RoutingRule, RuleType, ScanEvent,
    ShortLink, UtmParams,
};

/// 请求路径上的只读查询
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// 按短码查询激活中的短链接
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortLink>>;

    /// 激活的路由规则，按 priority 降序，同优先级保持录入顺序
    async fn active_rules(&self, short_link_id: i64) -> Result<Vec<RoutingRule>>;

    /// 激活的像素配置
    async fn active_pixels(&self, short_link_id: i64) -> Result<Vec<PixelConfig>>;
}

/// 扫码历史（读）与扫码副作用（写）
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert_scan(&self, event: &ScanEvent) -> anyhow::Result<()>;

    /// 原子递增 scan_count 并更新 last_scanned_at
    async fn increment_scan_count(&self, short_link_id: i64, at: DateTime<Utc>)
    -> anyhow::Result<()>;

    /// 该访客最近一次扫描此链接的时间
    async fn last_visit(
        &self,
        short_link_id: i64,
        visitor_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// `since` 之后来自该 IP 的扫码次数
    async fn count_scans_from_ip(
        &self,
        short_link_id: i64,
        ip: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    /// `since` 之后的全部扫码（异常分析用）
    async fn scans_since(
        &self,
        short_link_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ScanEvent>>;
}

/// 已构建的存储后端
#[derive(Clone)]
pub struct StorageHandles {
    pub links: Arc<dyn LinkRepository>,
    pub scans: Arc<dyn ScanStore>,
    pub backend_name: String,
}

pub struct StorageFactory;

impl StorageFactory {
    /// 根据 database_url 构建存储（`memory` 使用进程内存储）
    pub async fn create(config: &crate::config::DatabaseConfig) -> Result<StorageHandles> {
        if config.database_url == "memory" {
            let storage = Arc::new(MemoryStorage::new());
            return Ok(StorageHandles {
                links: storage.clone(),
                scans: storage,
                backend_name: "memory".to_string(),
            });
        }

        let backend_type = backend::infer_backend_from_url(&config.database_url)?;
        let storage = Arc::new(SeaOrmStorage::new(config, &backend_type).await?);
        Ok(StorageHandles {
            links: storage.clone(),
            scans: storage,
            backend_name: backend_type,
        })
    }
}
