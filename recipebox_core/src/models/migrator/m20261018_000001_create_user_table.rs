use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .col(pk_uuid(User::UserId))
                    .col(string_uniq(User::Username))
                    .col(string_uniq(User::Email))
                    .col(string(User::PasswordHash))
                    .col(string(User::Role).default("user"))
                    .col(timestamp_with_time_zone(User::DateJoined))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum User {
    Table,
    UserId,
    Username,
    Email,
    PasswordHash,
    Role,
    DateJoined,
}
