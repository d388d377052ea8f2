//! Write operations for SeaOrmStorage
//!
//! Link provisioning lives outside the redirect engine; these helpers
//! are what seeding scripts and integration tests use.

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::info;

use super::SeaOrmStorage;
use super::converters::shortlink_to_active_model;
use crate::errors::{QrLinkerError, Result};
use crate::storage::{PixelConfig, RoutingRule, ShortLink};

use migration::entities::{pixel_config, routing_rule, short_link};

impl SeaOrmStorage {
    /// 插入短链接，返回新 id
    pub async fn insert_link(&self, link: &ShortLink) -> Result<i64> {
        if !crate::utils::is_valid_short_code(&link.code) {
            return Err(QrLinkerError::validation(format!(
                "非法短码: {}",
                link.code
            )));
        }

        let result = short_link::Entity::insert(shortlink_to_active_model(link))
            .exec(&self.db)
            .await?;

        info!("Short link '{}' created", link.code);
        Ok(result.last_insert_id)
    }

    /// 追加路由规则，position 取当前规则数，保证同优先级按录入顺序
    pub async fn add_rule(&self, short_link_id: i64, rule: &RoutingRule) -> Result<i64> {
        use sea_orm::ActiveValue::*;

        let position = routing_rule::Entity::find()
            .filter(routing_rule::Column::ShortLinkId.eq(short_link_id))
            .count(&self.db)
            .await?;

        let model = routing_rule::ActiveModel {
            id: NotSet,
            short_link_id: Set(short_link_id),
            rule_type: Set(rule.rule_type.as_ref().to_string()),
            condition: Set(rule.condition.to_string()),
            destination: Set(rule.destination.clone()),
            priority: Set(rule.priority),
            position: Set(position as i32),
            is_active: Set(rule.is_active),
        };

        let result = routing_rule::Entity::insert(model).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn add_pixel(&self, short_link_id: i64, pixel: &PixelConfig) -> Result<i64> {
        use sea_orm::ActiveValue::*;

        let model = pixel_config::ActiveModel {
            id: NotSet,
            short_link_id: Set(short_link_id),
            provider: Set(pixel.provider.as_ref().to_string()),
            tracking_id: Set(pixel.tracking_id.clone()),
            events: Set(serde_json::to_string(&pixel.events)?),
            delay_redirect_ms: Set(pixel.delay_redirect_ms.min(i32::MAX as u32) as i32),
            is_active: Set(pixel.is_active),
            custom_script: Set(pixel.custom_script.clone()),
        };

        let result = pixel_config::Entity::insert(model).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }
}
