//! IP 信誉（黑名单）
//!
//! 调用方只依赖 `IpReputation`；单实例用进程内实现，
//! 水平扩展时换成 Redis 共享集合。

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::config::FraudConfig;
use crate::utils::ip::{Cidr, parse_cidrs};

#[async_trait]
pub trait IpReputation: Send + Sync {
    async fn is_blocked(&self, ip: &IpAddr) -> anyhow::Result<bool>;

    async fn block_ip(&self, ip: IpAddr) -> anyhow::Result<()>;

    async fn unblock_ip(&self, ip: IpAddr) -> anyhow::Result<()>;

    /// 网段始终保存在本进程内
    fn block_range(&self, range: Cidr);

    fn name(&self) -> &'static str;
}

/// 进程内黑名单：读多写少
#[derive(Default)]
pub struct MemoryBlocklist {
    ips: RwLock<HashSet<IpAddr>>,
    ranges: RwLock<Vec<Cidr>>,
}

impl MemoryBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FraudConfig) -> Self {
        let list = Self::new();
        for ip in &config.blocked_ips {
            match ip.trim().parse::<IpAddr>() {
                Ok(addr) => {
                    list.ips.write().insert(addr);
                }
                Err(_) => tracing::warn!("Ignoring invalid blocked IP: {}", ip),
            }
        }
        list.ranges
            .write()
            .extend(parse_cidrs(&config.blocked_ranges));
        list
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        self.ips.read().contains(ip) || self.in_ranges(ip)
    }

    fn in_ranges(&self, ip: &IpAddr) -> bool {
        self.ranges.read().iter().any(|range| range.contains(ip))
    }

    pub fn len(&self) -> usize {
        self.ips.read().len() + self.ranges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IpReputation for MemoryBlocklist {
    async fn is_blocked(&self, ip: &IpAddr) -> anyhow::Result<bool> {
        Ok(self.contains(ip))
    }

    async fn block_ip(&self, ip: IpAddr) -> anyhow::Result<()> {
        self.ips.write().insert(ip);
        debug!("IP {} added to blocklist", ip);
        Ok(())
    }

    async fn unblock_ip(&self, ip: IpAddr) -> anyhow::Result<()> {
        self.ips.write().remove(&ip);
        debug!("IP {} removed from blocklist", ip);
        Ok(())
    }

    fn block_range(&self, range: Cidr) {
        self.ranges.write().push(range);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis 共享黑名单：单个 IP 存于 SET，网段保存在本地
pub struct RedisBlocklist {
    client: redis::Client,
    connection: tokio::sync::RwLock<Option<MultiplexedConnection>>,
    key: String,
    local: MemoryBlocklist,
}

impl RedisBlocklist {
    pub fn new(config: &FraudConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let local = MemoryBlocklist::new();
        local.ranges.write().extend(parse_cidrs(&config.blocked_ranges));

        Ok(Self {
            client,
            connection: tokio::sync::RwLock::new(None),
            key: config.redis_key.clone(),
            local,
        })
    }

    /// 获取或建立持久连接
    async fn get_connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        if let Some(ref conn) = *self.connection.read().await {
            return Ok(conn.clone());
        }

        let mut guard = self.connection.write().await;
        if let Some(ref conn) = *guard {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        debug!("Redis blocklist connection established");
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }

    /// 启动时把配置中的 IP 写入共享集合
    pub async fn seed(&self, ips: &[String]) -> anyhow::Result<()> {
        for ip in ips {
            if let Ok(addr) = ip.trim().parse::<IpAddr>() {
                self.block_ip(addr).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IpReputation for RedisBlocklist {
    async fn is_blocked(&self, ip: &IpAddr) -> anyhow::Result<bool> {
        if self.local.in_ranges(ip) {
            return Ok(true);
        }

        let mut conn = self.get_connection().await?;
        let result: redis::RedisResult<bool> = conn.sismember(&self.key, ip.to_string()).await;
        if result.is_err() {
            self.reset_connection().await;
        }
        Ok(result?)
    }

    async fn block_ip(&self, ip: IpAddr) -> anyhow::Result<()> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.sadd(&self.key, ip.to_string()).await?;
        Ok(())
    }

    async fn unblock_ip(&self, ip: IpAddr) -> anyhow::Result<()> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.srem(&self.key, ip.to_string()).await?;
        Ok(())
    }

    fn block_range(&self, range: Cidr) {
        self.local.block_range(range);
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// 按 `fraud.blocklist_backend` 构建黑名单
pub async fn build_blocklist(config: &FraudConfig) -> anyhow::Result<Arc<dyn IpReputation>> {
    match config.blocklist_backend.as_str() {
        "redis" => {
            let list = RedisBlocklist::new(config)?;
            list.seed(&config.blocked_ips).await?;
            info!("IP blocklist backed by Redis set '{}'", config.redis_key);
            Ok(Arc::new(list))
        }
        "memory" => {
            let list = MemoryBlocklist::from_config(config);
            info!("IP blocklist loaded with {} entries", list.len());
            Ok(Arc::new(list))
        }
        other => anyhow::bail!("unknown blocklist backend: {}", other),
    }
}
