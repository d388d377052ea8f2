//! ScanStore implementation for SeaOrmStorage
//!
//! Scan history reads used by fraud scoring and visitor uniqueness,
//! plus the writes performed by the scan recorder.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, EntityTrait, ExprTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::debug;

use super::converters::{model_to_scan_event, scan_event_to_active_model};
use super::{SeaOrmStorage, retry};
use crate::storage::{ScanEvent, ScanStore};

use migration::entities::{scan_event, short_link};

#[async_trait]
impl ScanStore for SeaOrmStorage {
    async fn insert_scan(&self, event: &ScanEvent) -> anyhow::Result<()> {
        let db = &self.db;

        // 写入只尝试一次，重试由扫码记录队列负责
        scan_event::Entity::insert(scan_event_to_active_model(event))
            .exec(db)
            .await
            .context("Failed to insert scan event")?;

        debug!(
            "Scan event stored for link {} (visitor {})",
            event.short_link_id, event.visitor_id
        );
        Ok(())
    }

    async fn increment_scan_count(
        &self,
        short_link_id: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let db = &self.db;

        // 单条 UPDATE，并发扫码不会丢计数
        short_link::Entity::update_many()
            .col_expr(
                short_link::Column::ScanCount,
                Expr::col(short_link::Column::ScanCount).add(1),
            )
            .col_expr(short_link::Column::LastScannedAt, Expr::value(at))
            .filter(short_link::Column::Id.eq(short_link_id))
            .exec(db)
            .await
            .context("Failed to increment scan count")?;

        Ok(())
    }

    async fn last_visit(
        &self,
        short_link_id: i64,
        visitor_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let db = &self.db;

        let last = retry::with_retry("last_visit", self.retry_config, || {
            scan_event::Entity::find()
                .select_only()
                .column(scan_event::Column::ScannedAt)
                .filter(scan_event::Column::ShortLinkId.eq(short_link_id))
                .filter(scan_event::Column::VisitorId.eq(visitor_id))
                .order_by_desc(scan_event::Column::ScannedAt)
                .into_tuple::<DateTime<Utc>>()
                .one(db)
        })
        .await?;

        Ok(last)
    }

    async fn count_scans_from_ip(
        &self,
        short_link_id: i64,
        ip: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let db = &self.db;

        let count = retry::with_retry("count_scans_from_ip", self.retry_config, || {
            scan_event::Entity::find()
                .filter(scan_event::Column::ShortLinkId.eq(short_link_id))
                .filter(scan_event::Column::IpAddress.eq(ip))
                .filter(scan_event::Column::ScannedAt.gte(since))
                .count(db)
        })
        .await?;

        Ok(count)
    }

    async fn scans_since(
        &self,
        short_link_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ScanEvent>> {
        let db = &self.db;

        let models = retry::with_retry("scans_since", self.retry_config, || {
            scan_event::Entity::find()
                .filter(scan_event::Column::ShortLinkId.eq(short_link_id))
                .filter(scan_event::Column::ScannedAt.gte(since))
                .order_by_asc(scan_event::Column::ScannedAt)
                .all(db)
        })
        .await?;

        Ok(models.into_iter().map(model_to_scan_event).collect())
    }
}
