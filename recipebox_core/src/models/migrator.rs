use sea_orm_migration::prelude::*;

mod m20261018_000001_create_user_table;
mod m20261018_000002_create_ingredient_table;
mod m20261018_000003_create_tag_table;
mod m20261018_000004_create_recipe_table;
mod m20261018_000005_create_step_table;
mod m20261018_000006_create_recipe_ingredient_table;
mod m20261018_000007_create_recipe_tag_table;
mod m20261018_000008_create_collection_table;
mod m20261018_000009_create_collection_item_table;
mod m20261018_000010_create_review_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_create_user_table::Migration),
            Box::new(m20261018_000002_create_ingredient_table::Migration),
            Box::new(m20261018_000003_create_tag_table::Migration),
            Box::new(m20261018_000004_create_recipe_table::Migration),
            Box::new(m20261018_000005_create_step_table::Migration),
            Box::new(m20261018_000006_create_recipe_ingredient_table::Migration),
            Box::new(m20261018_000007_create_recipe_tag_table::Migration),
            Box::new(m20261018_000008_create_collection_table::Migration),
            Box::new(m20261018_000009_create_collection_item_table::Migration),
            Box::new(m20261018_000010_create_review_table::Migration),
        ]
    }
}
