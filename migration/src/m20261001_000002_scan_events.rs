//! 扫码事件表迁移
//!
//! scan_events 为只追加表，记录每一次成功解析的扫码：
//! - 客户端信息 (ip, user_agent, device/browser/os)
//! - 来源 (referrer)
//! - 地理位置 (country, city)
//! - 访客标识与唯一性

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScanEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScanEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ScanEvents::ShortLinkId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScanEvents::IpAddress).string_len(45).null())
                    .col(ColumnDef::new(ScanEvents::UserAgent).text().null())
                    .col(ColumnDef::new(ScanEvents::Device).string_len(32).null())
                    .col(ColumnDef::new(ScanEvents::Browser).string_len(64).null())
                    .col(ColumnDef::new(ScanEvents::Os).string_len(64).null())
                    .col(ColumnDef::new(ScanEvents::Referrer).text().null())
                    .col(ColumnDef::new(ScanEvents::Country).string_len(64).null())
                    .col(ColumnDef::new(ScanEvents::City).string_len(100).null())
                    .col(
                        ColumnDef::new(ScanEvents::VisitorId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScanEvents::IsUnique)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScanEvents::IsBot)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScanEvents::ScannedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 访客唯一性查询 (link, visitor)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_scan_events_link_visitor")
                    .table(ScanEvents::Table)
                    .col(ScanEvents::ShortLinkId)
                    .col(ScanEvents::VisitorId)
                    .to_owned(),
            )
            .await?;

        // 近期扫码频率查询 (link, ip, time)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_scan_events_link_ip_time")
                    .table(ScanEvents::Table)
                    .col(ScanEvents::ShortLinkId)
                    .col(ScanEvents::IpAddress)
                    .col(ScanEvents::ScannedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_scan_events_link_ip_time")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_scan_events_link_visitor")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ScanEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScanEvents {
    #[sea_orm(iden = "scan_events")]
    Table,
    Id,
    ShortLinkId,
    IpAddress,
    UserAgent,
    Device,
    Browser,
    Os,
    Referrer,
    Country,
    City,
    VisitorId,
    IsUnique,
    IsBot,
    ScannedAt,
}
