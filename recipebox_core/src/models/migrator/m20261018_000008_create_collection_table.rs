use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Collection::Table)
                    .col(pk_uuid(Collection::CollectionId))
                    .col(uuid(Collection::UserId))
                    .col(string(Collection::Name))
                    .col(timestamp_with_time_zone(Collection::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collection_user_id")
                            .from(Collection::Table, Collection::UserId)
                            .to(User::Table, User::UserId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_collection_user_id")
                    .table(Collection::Table)
                    .col(Collection::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Collection::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Collection {
    Table,
    CollectionId,
    UserId,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum User {
    Table,
    UserId,
}
