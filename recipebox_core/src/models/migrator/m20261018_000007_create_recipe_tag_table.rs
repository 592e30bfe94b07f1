use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecipeTag::Table)
                    .col(ColumnDef::new(RecipeTag::RecipeId).uuid().not_null())
                    .col(ColumnDef::new(RecipeTag::TagId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(RecipeTag::RecipeId)
                            .col(RecipeTag::TagId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recipe_tag_recipe_id")
                            .from(RecipeTag::Table, RecipeTag::RecipeId)
                            .to(Recipe::Table, Recipe::RecipeId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recipe_tag_tag_id")
                            .from(RecipeTag::Table, RecipeTag::TagId)
                            .to(Tag::Table, Tag::TagId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recipe_tag_tag_id")
                    .table(RecipeTag::Table)
                    .col(RecipeTag::TagId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecipeTag::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RecipeTag {
    Table,
    RecipeId,
    TagId,
}

#[derive(DeriveIden)]
enum Recipe {
    Table,
    RecipeId,
}

#[derive(DeriveIden)]
enum Tag {
    Table,
    TagId,
}
