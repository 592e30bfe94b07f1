use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;

use crate::{
    entity::{recipe, user},
    ids::UserId,
    models::migrator::Migrator,
};

/// Fresh in-memory SQLite database with every migration applied.
/// SQLite pools default to a single connection, so each call is isolated.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// Inserts a user named `username` with a placeholder password hash.
pub async fn create_test_user(db: &DatabaseConnection, username: &str) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        password_hash: Set("not-a-real-hash".to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test user")
}

pub async fn create_test_recipe(
    db: &DatabaseConnection,
    author: UserId,
    title: &str,
    is_public: bool,
) -> recipe::Model {
    recipe::ActiveModel {
        user_id: Set(author),
        title: Set(title.to_string()),
        description: Set(None),
        is_public: Set(is_public),
        prep_time: Set(None),
        cook_time: Set(None),
        servings: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create test recipe")
}
