use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20261018_000004_create_recipe_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Recipe::Table)
                    .col(
                        ColumnDef::new(Recipe::RecipeId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Recipe::UserId).uuid().not_null())
                    .col(ColumnDef::new(Recipe::Title).string().not_null())
                    .col(ColumnDef::new(Recipe::Description).text().null())
                    .col(
                        ColumnDef::new(Recipe::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Recipe::PrepTime).integer().null())
                    .col(ColumnDef::new(Recipe::CookTime).integer().null())
                    .col(ColumnDef::new(Recipe::Servings).integer().null())
                    .col(
                        ColumnDef::new(Recipe::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Recipe::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recipe_user_id")
                            .from(Recipe::Table, Recipe::UserId)
                            .to(User::Table, User::UserId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create index on user_id
        manager
            .create_index(
                Index::create()
                    .name("idx_recipe_user_id")
                    .table(Recipe::Table)
                    .col(Recipe::UserId)
                    .to_owned(),
            )
            .await?;

        // Public listing is ordered by creation time
        manager
            .create_index(
                Index::create()
                    .name("idx_recipe_public_created_at")
                    .table(Recipe::Table)
                    .col(Recipe::IsPublic)
                    .col(Recipe::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Recipe::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Recipe {
    Table,
    RecipeId,
    UserId,
    Title,
    Description,
    IsPublic,
    PrepTime,
    CookTime,
    Servings,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    UserId,
}
