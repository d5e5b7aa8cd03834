use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Deals {
    Table,
    Id,
    Title,
    Organization,
    ContactName,
    ContactEmail,
    ContactPhone,
    Value,
    Margin,
    QualityLead,
    ProposalType,
    Channel,
    DueDate,
    DeliveryDate,
    Notes,
    Status,
    Reason,
    Archived,
    SearchText,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealNotes {
    Table,
    Id,
    DealId,
    AuthorId,
    Content,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DealActivities {
    Table,
    Id,
    DealId,
    Title,
    Description,
    Kind,
    ScheduledDate,
    ScheduledTime,
    Status,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum DealStatusHistory {
    Table,
    Id,
    DealId,
    FromStatus,
    NewStatus,
    Notes,
    ChangedBy,
    ChangedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

// Child rows reference deals without ON DELETE CASCADE; the deal store
// removes them explicitly before deleting the parent.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deals::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deals::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Deals::Organization).string_len(256))
                    .col(ColumnDef::new(Deals::ContactName).string_len(256))
                    .col(ColumnDef::new(Deals::ContactEmail).string_len(320))
                    .col(ColumnDef::new(Deals::ContactPhone).string_len(64))
                    .col(ColumnDef::new(Deals::Value).big_integer())
                    .col(ColumnDef::new(Deals::Margin).double())
                    .col(ColumnDef::new(Deals::QualityLead).small_integer())
                    .col(ColumnDef::new(Deals::ProposalType).string_len(128))
                    .col(ColumnDef::new(Deals::Channel).string_len(128))
                    .col(ColumnDef::new(Deals::DueDate).date())
                    .col(ColumnDef::new(Deals::DeliveryDate).date())
                    .col(ColumnDef::new(Deals::Notes).text())
                    .col(
                        ColumnDef::new(Deals::Status)
                            .string_len(32)
                            .not_null()
                            .default("Prospección General"),
                    )
                    .col(ColumnDef::new(Deals::Reason).text())
                    .col(
                        ColumnDef::new(Deals::Archived)
                            .boolean()
                            .not_null()
                            .default(Expr::value(false)),
                    )
                    .col(
                        ColumnDef::new(Deals::SearchText)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Deals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deals::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deals_status")
                    .table(Deals::Table)
                    .col(Deals::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deals_archived")
                    .table(Deals::Table)
                    .col(Deals::Archived)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealNotes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DealNotes::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(DealNotes::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealNotes::AuthorId).uuid())
                    .col(ColumnDef::new(DealNotes::Content).text().not_null())
                    .col(
                        ColumnDef::new(DealNotes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_notes_deal")
                            .from(DealNotes::Table, DealNotes::DealId)
                            .to(Deals::Table, Deals::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_notes_deal")
                    .table(DealNotes::Table)
                    .col(DealNotes::DealId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealActivities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealActivities::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealActivities::DealId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealActivities::Title)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealActivities::Description).text())
                    .col(
                        ColumnDef::new(DealActivities::Kind)
                            .string_len(32)
                            .not_null()
                            .default("task"),
                    )
                    .col(ColumnDef::new(DealActivities::ScheduledDate).date().not_null())
                    .col(ColumnDef::new(DealActivities::ScheduledTime).time())
                    .col(
                        ColumnDef::new(DealActivities::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(DealActivities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(DealActivities::CompletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_activities_deal")
                            .from(DealActivities::Table, DealActivities::DealId)
                            .to(Deals::Table, Deals::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_activities_schedule")
                    .table(DealActivities::Table)
                    .col(DealActivities::DealId)
                    .col(DealActivities::ScheduledDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealStatusHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealStatusHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealStatusHistory::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealStatusHistory::FromStatus).string_len(32))
                    .col(
                        ColumnDef::new(DealStatusHistory::NewStatus)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealStatusHistory::Notes).text())
                    .col(ColumnDef::new(DealStatusHistory::ChangedBy).uuid())
                    .col(
                        ColumnDef::new(DealStatusHistory::ChangedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_status_history_deal")
                            .from(DealStatusHistory::Table, DealStatusHistory::DealId)
                            .to(Deals::Table, Deals::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_status_history_deal")
                    .table(DealStatusHistory::Table)
                    .col(DealStatusHistory::DealId)
                    .col(DealStatusHistory::ChangedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DealStatusHistory::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DealActivities::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DealNotes::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deals::Table).if_exists().to_owned())
            .await
    }
}
