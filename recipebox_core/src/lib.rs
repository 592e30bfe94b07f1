use std::{future::Future, pin::Pin, sync::Arc};

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::{
    config::{ConfigError, RecipeBoxConfig},
    error::QueryError,
    query::Crud,
    service::{
        CollectionsService, IngredientsService, RecipesService, ReviewsService, TagsService,
        UsersService,
    },
    transaction::{TransactionError, TransactionOptions},
};

pub mod config;
pub mod entity;
pub mod error;
pub mod ids;
pub mod models;
pub mod query;
pub mod service;
pub mod telemetry;
pub mod transaction;

#[cfg(test)]
pub mod test_utils;

static RECIPEBOX: OnceCell<Arc<RecipeBox>> = OnceCell::const_new();

/// Process-wide handle, started from the on-disk config on first use.
pub async fn core() -> Result<Arc<RecipeBox>, RecipeBoxError> {
    RECIPEBOX
        .get_or_try_init(|| async { RecipeBox::start().await.map(Arc::new) })
        .await
        .cloned()
}

#[derive(Debug, Error)]
pub enum RecipeBoxError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] QueryError),
}

impl From<DbErr> for RecipeBoxError {
    fn from(err: DbErr) -> Self {
        Self::Database(err.into())
    }
}

/// Main runtime handle: the pooled connection plus every service over it.
pub struct RecipeBox {
    pub config: RecipeBoxConfig,

    pub db: DatabaseConnection,

    pub users: UsersService,
    pub recipes: RecipesService,
    pub ingredients: IngredientsService,
    pub tags: TagsService,
    pub collections: CollectionsService,
    pub reviews: ReviewsService,
}

impl RecipeBox {
    /// Loads `<data_dir>/recipebox/config.json` (creating it on first run) and connects.
    pub async fn start() -> Result<Self, RecipeBoxError> {
        let config = config::get_or_init().await?;
        Self::connect(config).await
    }

    /// Connects to `config.database_url` and brings the schema up to date.
    pub async fn connect(config: RecipeBoxConfig) -> Result<Self, RecipeBoxError> {
        telemetry::init(&config.log_filter);

        let db = models::open_or_create_db(&config).await?;
        models::migrate_up(&db).await?;

        tracing::info!(url = %config.redacted_database_url(), "recipebox ready");

        Ok(Self {
            users: UsersService::new(db.clone()),
            recipes: RecipesService::new(db.clone()),
            ingredients: IngredientsService::new(db.clone()),
            tags: TagsService::new(db.clone()),
            collections: CollectionsService::new(db.clone()),
            reviews: ReviewsService::new(db.clone()),
            config,
            db,
        })
    }

    /// Raw verb surface for any entity, outside the services.
    pub fn crud<E: EntityTrait>(&self) -> Crud<'_, E, DatabaseConnection> {
        query::crud(&self.db)
    }

    pub async fn transaction<F, T, E>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: Send,
    {
        transaction::run_transaction(&self.db, options, body).await
    }

    pub async fn shutdown(self) -> Result<(), RecipeBoxError> {
        tracing::info!("closing database pool");
        self.db.close().await?;
        Ok(())
    }
}

pub mod prelude {
    pub use super::config;
    pub use super::entity;
    pub use super::error;
    pub use super::ids;
    pub use super::models;
    pub use super::query;
    pub use super::service;
    pub use super::transaction;

    pub use super::{core, RecipeBox, RecipeBoxError};

    pub use sea_orm;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::prelude::*;
    use crate::query::FindMany;
    use crate::service::NewRecipe;

    async fn in_memory() -> RecipeBox {
        RecipeBox::connect(RecipeBoxConfig::in_memory())
            .await
            .expect("Failed to start recipebox")
    }

    #[tokio::test]
    async fn test_connect_migrates_and_wires_services() {
        let rb = in_memory().await;

        let cook = rb
            .users
            .register("cook", "cook@example.com", "mise en place")
            .await
            .unwrap();
        let recipe = rb
            .recipes
            .create(
                cook.user_id,
                NewRecipe {
                    title: "Toast".into(),
                    is_public: true,
                    steps: vec!["Toast the bread".into()],
                    tags: vec!["breakfast".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let tags = rb.tags.tags_for_recipe(recipe.recipe_id).await.unwrap();
        assert_eq!(tags.len(), 1);

        let found = rb
            .crud::<Recipe>()
            .find_many(FindMany::new().filter(RecipeColumn::IsPublic.eq(true)))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        rb.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_through_handle() {
        let rb = in_memory().await;

        let result = rb
            .transaction(TransactionOptions::default(), |txn| {
                Box::pin(async move {
                    TagActiveModel {
                        name: Set("rolled-back".into()),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;
                    Err::<(), QueryError>(QueryError::NotFound("recipe".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(TransactionError::Aborted(e)) if e.is_not_found()));
        assert_eq!(rb.crud::<Tag>().count(Condition::all()).await.unwrap(), 0);
    }
}
