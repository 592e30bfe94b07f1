use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

use crate::config::RecipeBoxConfig;

pub mod migrator;

/// Opens a pooled connection described by `config`. SQLite URLs created with
/// `?mode=rwc` create the file on first use.
pub async fn open_or_create_db(config: &RecipeBoxConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .sqlx_logging(config.sqlx_logging);

    if let Some(max) = config.max_connections {
        options.max_connections(max);
    }
    if let Some(min) = config.min_connections {
        options.min_connections(min);
    }

    tracing::debug!(url = %config.redacted_database_url(), "connecting to database");
    Database::connect(options).await
}

pub async fn migrate_up(db: &DatabaseConnection) -> Result<(), DbErr> {
    let pending = migrator::Migrator::get_pending_migrations(db).await?.len();
    migrator::Migrator::up(db, None).await?;
    tracing::info!(applied = pending, "database migrations up to date");
    Ok(())
}
