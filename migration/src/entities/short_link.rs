use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "short_links")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub short_code: String,
    #[sea_orm(column_type = "Text")]
    pub destination_url: String,
    pub password: Option<String>,
    pub expires_at: Option<DateTimeUtc>,
    pub max_scans: Option<i64>,
    pub scan_count: i64,
    pub last_scanned_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub fallback_url: Option<String>,
    /// JSON 编码的 UTM 参数
    #[sea_orm(column_type = "Text", nullable)]
    pub utm_params: Option<String>,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
