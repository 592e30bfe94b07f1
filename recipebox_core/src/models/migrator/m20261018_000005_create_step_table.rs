use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Step::Table)
                    .col(ColumnDef::new(Step::StepId).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Step::RecipeId).uuid().not_null())
                    .col(ColumnDef::new(Step::StepNumber).integer().not_null())
                    .col(ColumnDef::new(Step::Instruction).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_step_recipe_id")
                            .from(Step::Table, Step::RecipeId)
                            .to(Recipe::Table, Recipe::RecipeId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One step per position in a recipe
        manager
            .create_index(
                Index::create()
                    .name("idx_step_recipe_number_unique")
                    .table(Step::Table)
                    .col(Step::RecipeId)
                    .col(Step::StepNumber)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Step::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Step {
    Table,
    StepId,
    RecipeId,
    StepNumber,
    Instruction,
}

#[derive(DeriveIden)]
enum Recipe {
    Table,
    RecipeId,
}
