use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Review::Table)
                    .col(
                        ColumnDef::new(Review::ReviewId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Review::UserId).uuid().not_null())
                    .col(ColumnDef::new(Review::RecipeId).uuid().not_null())
                    .col(ColumnDef::new(Review::Rating).integer().not_null())
                    .col(ColumnDef::new(Review::Comment).text().null())
                    .col(
                        ColumnDef::new(Review::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_review_user_id")
                            .from(Review::Table, Review::UserId)
                            .to(User::Table, User::UserId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_review_recipe_id")
                            .from(Review::Table, Review::RecipeId)
                            .to(Recipe::Table, Recipe::RecipeId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // A user reviews a recipe at most once
        manager
            .create_index(
                Index::create()
                    .name("idx_review_user_recipe_unique")
                    .table(Review::Table)
                    .col(Review::UserId)
                    .col(Review::RecipeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_review_recipe_id")
                    .table(Review::Table)
                    .col(Review::RecipeId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Review::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Review {
    Table,
    ReviewId,
    UserId,
    RecipeId,
    Rating,
    Comment,
    CreatedAt,
}

#[derive(DeriveIden)]
enum User {
    Table,
    UserId,
}

#[derive(DeriveIden)]
enum Recipe {
    Table,
    RecipeId,
}
