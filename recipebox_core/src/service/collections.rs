use std::collections::HashMap;

use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::{CollectionId, RecipeId, UserId},
    query::{crud, FindMany, GroupBy},
    service::recipes::{can_view, visible_to},
};

#[derive(Debug, Error)]
pub enum CollectionsServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("collection not found")]
    CollectionNotFound,

    #[error("recipe not found")]
    RecipeNotFound,

    #[error("unauthorized: not collection owner")]
    NotCollectionOwner,

    #[error("collection name is empty")]
    InvalidName,
}

impl From<DbErr> for CollectionsServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

fn clean_name(name: &str) -> Result<String, CollectionsServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CollectionsServiceError::InvalidName);
    }
    Ok(name.to_string())
}

/// Collections are private to the user who made them.
#[derive(Clone)]
pub struct CollectionsService {
    db: DatabaseConnection,
}

impl CollectionsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn owned_collection(
        &self,
        actor: UserId,
        collection_id: CollectionId,
    ) -> Result<CollectionModel, CollectionsServiceError> {
        let collection = crud::<Collection, _>(&self.db)
            .find_by_id(collection_id)
            .await?
            .ok_or(CollectionsServiceError::CollectionNotFound)?;
        if collection.user_id != actor {
            return Err(CollectionsServiceError::NotCollectionOwner);
        }
        Ok(collection)
    }

    pub async fn create(&self, owner: UserId, name: &str) -> Result<CollectionModel, CollectionsServiceError> {
        let collection = crud::<Collection, _>(&self.db)
            .create(CollectionActiveModel {
                user_id: Set(owner),
                name: Set(clean_name(name)?),
                ..Default::default()
            })
            .await?;

        tracing::debug!(collection_id = %collection.collection_id, %owner, "created collection");
        Ok(collection)
    }

    pub async fn get(
        &self,
        actor: UserId,
        collection_id: CollectionId,
    ) -> Result<CollectionModel, CollectionsServiceError> {
        self.owned_collection(actor, collection_id).await
    }

    pub async fn rename(
        &self,
        actor: UserId,
        collection_id: CollectionId,
        name: &str,
    ) -> Result<CollectionModel, CollectionsServiceError> {
        let name = clean_name(name)?;
        let collection = self.owned_collection(actor, collection_id).await?;

        let mut active = collection.into_active_model();
        active.name = Set(name);
        Ok(active.update(&self.db).await?)
    }

    pub async fn delete(&self, actor: UserId, collection_id: CollectionId) -> Result<(), CollectionsServiceError> {
        self.owned_collection(actor, collection_id).await?;
        crud::<Collection, _>(&self.db)
            .delete(Condition::all().add(CollectionColumn::CollectionId.eq(collection_id)))
            .await?;
        tracing::debug!(%collection_id, "deleted collection");
        Ok(())
    }

    /// Oldest first.
    pub async fn list_for_user(&self, owner: UserId) -> Result<Vec<CollectionModel>, CollectionsServiceError> {
        Ok(crud::<Collection, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(CollectionColumn::UserId.eq(owner))
                    .order_by_asc(CollectionColumn::CreatedAt)
                    .order_by_asc(CollectionColumn::CollectionId),
            )
            .await?)
    }

    /// Returns `false` when the recipe was already in the collection.
    pub async fn add_recipe(
        &self,
        actor: UserId,
        collection_id: CollectionId,
        recipe_id: RecipeId,
    ) -> Result<bool, CollectionsServiceError> {
        self.owned_collection(actor, collection_id).await?;
        crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .filter(|recipe| can_view(recipe, Some(actor)))
            .ok_or(CollectionsServiceError::RecipeNotFound)?;

        let added = crud::<CollectionItem, _>(&self.db)
            .create_many(
                vec![CollectionItemActiveModel {
                    collection_id: Set(collection_id),
                    recipe_id: Set(recipe_id),
                    ..Default::default()
                }],
                true,
            )
            .await?;

        Ok(added > 0)
    }

    /// Returns whether the recipe was in the collection.
    pub async fn remove_recipe(
        &self,
        actor: UserId,
        collection_id: CollectionId,
        recipe_id: RecipeId,
    ) -> Result<bool, CollectionsServiceError> {
        self.owned_collection(actor, collection_id).await?;
        let removed = crud::<CollectionItem, _>(&self.db)
            .delete_many(
                Condition::all()
                    .add(CollectionItemColumn::CollectionId.eq(collection_id))
                    .add(CollectionItemColumn::RecipeId.eq(recipe_id)),
            )
            .await?;
        Ok(removed > 0)
    }

    /// Recipes in the order they were added. Recipes made private by their
    /// author since then are skipped.
    pub async fn list_recipes(
        &self,
        actor: UserId,
        collection_id: CollectionId,
    ) -> Result<Vec<RecipeModel>, CollectionsServiceError> {
        self.owned_collection(actor, collection_id).await?;
        Ok(Recipe::find()
            .inner_join(CollectionItem)
            .filter(CollectionItemColumn::CollectionId.eq(collection_id))
            .filter(visible_to(Some(actor)))
            .order_by_asc(CollectionItemColumn::AddedAt)
            .all(&self.db)
            .await?)
    }

    /// Every collection of `owner` with its number of recipes.
    pub async fn item_counts(&self, owner: UserId) -> Result<Vec<(CollectionModel, u64)>, CollectionsServiceError> {
        let collections = self.list_for_user(owner).await?;
        if collections.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<CollectionId> = collections.iter().map(|c| c.collection_id).collect();
        let counts: HashMap<CollectionId, u64> = crud::<CollectionItem, _>(&self.db)
            .group_by::<CollectionId>(
                GroupBy::new([CollectionItemColumn::CollectionId])
                    .filter(CollectionItemColumn::CollectionId.is_in(ids)),
            )
            .await?
            .into_iter()
            .map(|group| (group.key, group.count()))
            .collect();

        Ok(collections
            .into_iter()
            .map(|collection| {
                let count = counts.get(&collection.collection_id).copied().unwrap_or_default();
                (collection, count)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    struct Fixture {
        service: CollectionsService,
        db: DatabaseConnection,
        owner: UserModel,
        author: UserModel,
    }

    async fn setup() -> Fixture {
        let db = test_utils::setup_test_db().await;
        let owner = test_utils::create_test_user(&db, "collector").await;
        let author = test_utils::create_test_user(&db, "author").await;
        Fixture {
            service: CollectionsService::new(db.clone()),
            db,
            owner,
            author,
        }
    }

    #[tokio::test]
    async fn test_create_rename_delete() {
        let f = setup().await;

        let weeknight = f.service.create(f.owner.user_id, " Weeknight ").await.unwrap();
        assert_eq!(weeknight.name, "Weeknight");

        let empty = f.service.create(f.owner.user_id, "").await;
        assert!(matches!(empty, Err(CollectionsServiceError::InvalidName)));

        let renamed = f
            .service
            .rename(f.owner.user_id, weeknight.collection_id, "Quick dinners")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Quick dinners");

        let denied = f.service.delete(f.author.user_id, weeknight.collection_id).await;
        assert!(matches!(denied, Err(CollectionsServiceError::NotCollectionOwner)));

        f.service.delete(f.owner.user_id, weeknight.collection_id).await.unwrap();
        assert!(f.service.list_for_user(f.owner.user_id).await.unwrap().is_empty());

        let missing = f.service.get(f.owner.user_id, weeknight.collection_id).await;
        assert!(matches!(missing, Err(CollectionsServiceError::CollectionNotFound)));
    }

    #[tokio::test]
    async fn test_add_and_list_recipes_in_order() {
        let f = setup().await;
        let collection = f.service.create(f.owner.user_id, "Baking").await.unwrap();
        let bread = test_utils::create_test_recipe(&f.db, f.author.user_id, "Bread", true).await;
        let scones = test_utils::create_test_recipe(&f.db, f.author.user_id, "Scones", true).await;
        let mine = test_utils::create_test_recipe(&f.db, f.owner.user_id, "My cake", false).await;

        for recipe in [&scones, &bread, &mine] {
            assert!(f
                .service
                .add_recipe(f.owner.user_id, collection.collection_id, recipe.recipe_id)
                .await
                .unwrap());
        }
        assert!(!f
            .service
            .add_recipe(f.owner.user_id, collection.collection_id, bread.recipe_id)
            .await
            .unwrap());

        let titles: Vec<String> = f
            .service
            .list_recipes(f.owner.user_id, collection.collection_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Scones", "Bread", "My cake"]);

        assert!(f
            .service
            .remove_recipe(f.owner.user_id, collection.collection_id, bread.recipe_id)
            .await
            .unwrap());
        assert!(!f
            .service
            .remove_recipe(f.owner.user_id, collection.collection_id, bread.recipe_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cannot_collect_others_private_recipes() {
        let f = setup().await;
        let collection = f.service.create(f.owner.user_id, "Stolen").await.unwrap();
        let private = test_utils::create_test_recipe(&f.db, f.author.user_id, "Secret", false).await;

        let result = f
            .service
            .add_recipe(f.owner.user_id, collection.collection_id, private.recipe_id)
            .await;
        assert!(matches!(result, Err(CollectionsServiceError::RecipeNotFound)));

        let not_owner = f
            .service
            .add_recipe(f.author.user_id, collection.collection_id, private.recipe_id)
            .await;
        assert!(matches!(not_owner, Err(CollectionsServiceError::NotCollectionOwner)));
    }

    #[tokio::test]
    async fn test_recipes_made_private_drop_out_of_listing() {
        let f = setup().await;
        let collection = f.service.create(f.owner.user_id, "Soups").await.unwrap();
        let soup = test_utils::create_test_recipe(&f.db, f.author.user_id, "Soup", true).await;
        f.service
            .add_recipe(f.owner.user_id, collection.collection_id, soup.recipe_id)
            .await
            .unwrap();

        let mut active = soup.into_active_model();
        active.is_public = Set(false);
        active.update(&f.db).await.unwrap();

        let listed = f
            .service
            .list_recipes(f.owner.user_id, collection.collection_id)
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_item_counts_include_empty_collections() {
        let f = setup().await;
        let full = f.service.create(f.owner.user_id, "Full").await.unwrap();
        let empty = f.service.create(f.owner.user_id, "Empty").await.unwrap();
        for title in ["A", "B"] {
            let recipe = test_utils::create_test_recipe(&f.db, f.author.user_id, title, true).await;
            f.service
                .add_recipe(f.owner.user_id, full.collection_id, recipe.recipe_id)
                .await
                .unwrap();
        }

        let counts: Vec<(CollectionId, u64)> = f
            .service
            .item_counts(f.owner.user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|(c, n)| (c.collection_id, n))
            .collect();
        assert_eq!(counts, vec![(full.collection_id, 2), (empty.collection_id, 0)]);

        assert!(f.service.item_counts(f.author.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_recipe_removes_collection_items() {
        let f = setup().await;
        let collection = f.service.create(f.owner.user_id, "Gone").await.unwrap();
        let recipe = test_utils::create_test_recipe(&f.db, f.author.user_id, "Ephemeral", true).await;
        f.service
            .add_recipe(f.owner.user_id, collection.collection_id, recipe.recipe_id)
            .await
            .unwrap();

        Recipe::delete_by_id(recipe.recipe_id).exec(&f.db).await.unwrap();

        assert_eq!(CollectionItem::find().count(&f.db).await.unwrap(), 0);
    }
}
