//! 短链接、路由规则与像素配置表

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 short_links 表
        manager
            .create_table(
                Table::create()
                    .table(ShortLinks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShortLinks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ShortLinks::ShortCode)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ShortLinks::DestinationUrl).text().not_null())
                    .col(ColumnDef::new(ShortLinks::Password).string().null())
                    .col(
                        ColumnDef::new(ShortLinks::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ShortLinks::MaxScans).big_integer().null())
                    .col(
                        ColumnDef::new(ShortLinks::ScanCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ShortLinks::LastScannedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ShortLinks::FallbackUrl).text().null())
                    .col(ColumnDef::new(ShortLinks::UtmParams).text().null())
                    .col(
                        ColumnDef::new(ShortLinks::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ShortLinks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 创建 routing_rules 表
        manager
            .create_table(
                Table::create()
                    .table(RoutingRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RoutingRules::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RoutingRules::ShortLinkId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RoutingRules::RuleType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RoutingRules::Condition).text().not_null())
                    .col(ColumnDef::new(RoutingRules::Destination).text().not_null())
                    .col(
                        ColumnDef::new(RoutingRules::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RoutingRules::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RoutingRules::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        // 规则按链接 + 优先级读取
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_routing_rules_link_priority")
                    .table(RoutingRules::Table)
                    .col(RoutingRules::ShortLinkId)
                    .col(RoutingRules::Priority)
                    .to_owned(),
            )
            .await?;

        // 创建 pixel_configs 表
        manager
            .create_table(
                Table::create()
                    .table(PixelConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PixelConfigs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PixelConfigs::ShortLinkId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PixelConfigs::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PixelConfigs::TrackingId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PixelConfigs::Events).text().not_null())
                    .col(
                        ColumnDef::new(PixelConfigs::DelayRedirectMs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PixelConfigs::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(PixelConfigs::CustomScript).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pixel_configs_link")
                    .table(PixelConfigs::Table)
                    .col(PixelConfigs::ShortLinkId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_pixel_configs_link").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_routing_rules_link_priority")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PixelConfigs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoutingRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ShortLinks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ShortLinks {
    #[sea_orm(iden = "short_links")]
    Table,
    Id,
    ShortCode,
    DestinationUrl,
    Password,
    ExpiresAt,
    MaxScans,
    ScanCount,
    LastScannedAt,
    FallbackUrl,
    UtmParams,
    IsActive,
    CreatedAt,
}

#[derive(DeriveIden)]
enum RoutingRules {
    #[sea_orm(iden = "routing_rules")]
    Table,
    Id,
    ShortLinkId,
    RuleType,
    Condition,
    Destination,
    Priority,
    Position,
    IsActive,
}

#[derive(DeriveIden)]
enum PixelConfigs {
    #[sea_orm(iden = "pixel_configs")]
    Table,
    Id,
    ShortLinkId,
    Provider,
    TrackingId,
    Events,
    DelayRedirectMs,
    IsActive,
    CustomScript,
}
