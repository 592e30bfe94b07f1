use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CollectionItem::Table)
                    .col(
                        ColumnDef::new(CollectionItem::CollectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CollectionItem::RecipeId).uuid().not_null())
                    .col(
                        ColumnDef::new(CollectionItem::AddedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CollectionItem::CollectionId)
                            .col(CollectionItem::RecipeId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collection_item_collection_id")
                            .from(CollectionItem::Table, CollectionItem::CollectionId)
                            .to(Collection::Table, Collection::CollectionId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collection_item_recipe_id")
                            .from(CollectionItem::Table, CollectionItem::RecipeId)
                            .to(Recipe::Table, Recipe::RecipeId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CollectionItem::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CollectionItem {
    Table,
    CollectionId,
    RecipeId,
    AddedAt,
}

#[derive(DeriveIden)]
enum Collection {
    Table,
    CollectionId,
}

#[derive(DeriveIden)]
enum Recipe {
    Table,
    RecipeId,
}
