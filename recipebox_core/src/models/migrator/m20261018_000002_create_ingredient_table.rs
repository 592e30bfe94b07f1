use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Ingredient::Table)
                    .col(pk_uuid(Ingredient::IngredientId))
                    .col(string(Ingredient::Name))
                    .col(string_null(Ingredient::Unit))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ingredient_name")
                    .table(Ingredient::Table)
                    .col(Ingredient::Name)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Ingredient::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Ingredient {
    Table,
    IngredientId,
    Name,
    Unit,
}
