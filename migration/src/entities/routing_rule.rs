//! Routing rule entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "routing_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub short_link_id: i64,
    /// device / time / language / scanLimit / geo / userAgent
    pub rule_type: String,
    /// JSON 条件载荷，按 rule_type 解析
    #[sea_orm(column_type = "Text")]
    pub condition: String,
    #[sea_orm(column_type = "Text")]
    pub destination: String,
    pub priority: i32,
    /// 录入顺序，用于同优先级时的稳定排序
    pub position: i32,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
