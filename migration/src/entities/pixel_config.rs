//! Retargeting pixel entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "pixel_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub short_link_id: i64,
    pub provider: String,
    pub tracking_id: String,
    /// JSON 数组，事件名列表
    #[sea_orm(column_type = "Text")]
    pub events: String,
    pub delay_redirect_ms: i32,
    pub is_active: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub custom_script: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
