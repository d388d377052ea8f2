//! LinkRepository implementation for SeaOrmStorage
//!
//! Read-only lookups on the redirect path.

use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::error;

use super::converters::{model_to_pixel, model_to_rule, model_to_shortlink};
use super::{SeaOrmStorage, retry};
use crate::errors::Result;
use crate::storage::{LinkRepository, PixelConfig, RoutingRule, ShortLink};

use migration::entities::{pixel_config, routing_rule, short_link};

#[async_trait]
impl LinkRepository for SeaOrmStorage {
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        let db = &self.db;

        let model = retry::with_retry(&format!("find_by_code({})", code), self.retry_config, || {
            short_link::Entity::find()
                .filter(short_link::Column::ShortCode.eq(code))
                .filter(short_link::Column::IsActive.eq(true))
                .one(db)
        })
        .await
        .map_err(|e| {
            error!("查询短链接失败（重试后仍失败）: {}", e);
            e
        })?;

        Ok(model.map(model_to_shortlink))
    }

    async fn active_rules(&self, short_link_id: i64) -> Result<Vec<RoutingRule>> {
        let db = &self.db;

        let models = retry::with_retry("active_rules", self.retry_config, || {
            routing_rule::Entity::find()
                .filter(routing_rule::Column::ShortLinkId.eq(short_link_id))
                .filter(routing_rule::Column::IsActive.eq(true))
                .order_by_desc(routing_rule::Column::Priority)
                .order_by_asc(routing_rule::Column::Position)
                .order_by_asc(routing_rule::Column::Id)
                .all(db)
        })
        .await?;

        Ok(models.into_iter().filter_map(model_to_rule).collect())
    }

    async fn active_pixels(&self, short_link_id: i64) -> Result<Vec<PixelConfig>> {
        let db = &self.db;

        let models = retry::with_retry("active_pixels", self.retry_config, || {
            pixel_config::Entity::find()
                .filter(pixel_config::Column::ShortLinkId.eq(short_link_id))
                .filter(pixel_config::Column::IsActive.eq(true))
                .order_by_asc(pixel_config::Column::Id)
                .all(db)
        })
        .await?;

        Ok(models.into_iter().filter_map(model_to_pixel).collect())
    }
}
