use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscribers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscribers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscribers::Email).string_len(320).not_null())
                    .col(ColumnDef::new(Subscribers::Name).string_len(256))
                    .col(ColumnDef::new(Subscribers::Source).string_len(64))
                    .col(
                        ColumnDef::new(Subscribers::Active)
                            .boolean()
                            .not_null()
                            .default(Expr::value(true)),
                    )
                    .col(
                        ColumnDef::new(Subscribers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Subscribers::UnsubscribedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_subscribers_email")
                    .table(Subscribers::Table)
                    .col(Subscribers::Email)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscribers::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Subscribers {
    Table,
    Id,
    Email,
    Name,
    Source,
    Active,
    CreatedAt,
    UnsubscribedAt,
}
