use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecipeIngredient::Table)
                    .col(
                        ColumnDef::new(RecipeIngredient::RecipeId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecipeIngredient::IngredientId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecipeIngredient::Quantity).string().null())
                    .primary_key(
                        Index::create()
                            .col(RecipeIngredient::RecipeId)
                            .col(RecipeIngredient::IngredientId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recipe_ingredient_recipe_id")
                            .from(RecipeIngredient::Table, RecipeIngredient::RecipeId)
                            .to(Recipe::Table, Recipe::RecipeId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recipe_ingredient_ingredient_id")
                            .from(RecipeIngredient::Table, RecipeIngredient::IngredientId)
                            .to(Ingredient::Table, Ingredient::IngredientId)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recipe_ingredient_ingredient_id")
                    .table(RecipeIngredient::Table)
                    .col(RecipeIngredient::IngredientId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecipeIngredient::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RecipeIngredient {
    Table,
    RecipeId,
    IngredientId,
    Quantity,
}

#[derive(DeriveIden)]
enum Recipe {
    Table,
    RecipeId,
}

#[derive(DeriveIden)]
enum Ingredient {
    Table,
    IngredientId,
}
