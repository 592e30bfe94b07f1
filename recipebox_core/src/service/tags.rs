use std::collections::HashMap;

use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::{RecipeId, TagId, UserId},
    query::{crud, FindMany, GroupBy},
    service::recipes::visible_to,
};

#[derive(Debug, Error)]
pub enum TagsServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("tag not found")]
    TagNotFound,

    #[error("a tag with that name already exists")]
    TagExists,

    #[error("tag name is empty")]
    InvalidName,

    #[error("recipe not found")]
    RecipeNotFound,

    #[error("unauthorized: not recipe author")]
    NotRecipeOwner,
}

impl From<DbErr> for TagsServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

/// Tag names are stored trimmed and lower-cased.
pub(crate) fn normalize_tag_name(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Returns the tag called `name` (already normalized), creating it if missing.
/// A concurrent insert of the same name is skipped rather than raised, so an
/// enclosing transaction stays usable.
pub(crate) async fn ensure_tag_on<C: ConnectionTrait>(db: &C, name: &str) -> Result<TagModel, QueryError> {
    let tags = crud::<Tag, _>(db);
    let by_name = || Condition::all().add(TagColumn::Name.eq(name));

    if let Some(tag) = tags.find_unique(by_name()).await? {
        return Ok(tag);
    }

    tags.create_many(
        vec![TagActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }],
        true,
    )
    .await?;
    tags.find_unique_or_throw(by_name()).await
}

#[derive(Clone)]
pub struct TagsService {
    db: DatabaseConnection,
}

impl TagsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn owned_recipe(&self, actor: UserId, recipe_id: RecipeId) -> Result<RecipeModel, TagsServiceError> {
        let recipe = crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .ok_or(TagsServiceError::RecipeNotFound)?;
        if recipe.user_id != actor {
            return Err(TagsServiceError::NotRecipeOwner);
        }
        Ok(recipe)
    }

    pub async fn ensure(&self, name: &str) -> Result<TagModel, TagsServiceError> {
        let name = normalize_tag_name(name).ok_or(TagsServiceError::InvalidName)?;
        Ok(ensure_tag_on(&self.db, &name).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<TagModel>, TagsServiceError> {
        let Some(name) = normalize_tag_name(name) else {
            return Ok(None);
        };
        Ok(crud::<Tag, _>(&self.db)
            .find_unique(Condition::all().add(TagColumn::Name.eq(name)))
            .await?)
    }

    pub async fn rename(&self, tag_id: TagId, name: &str) -> Result<TagModel, TagsServiceError> {
        let name = normalize_tag_name(name).ok_or(TagsServiceError::InvalidName)?;
        let tag = crud::<Tag, _>(&self.db)
            .update(
                Condition::all().add(TagColumn::TagId.eq(tag_id)),
                TagActiveModel {
                    name: Set(name),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => TagsServiceError::TagNotFound,
                QueryError::UniqueViolation(_) => TagsServiceError::TagExists,
                other => other.into(),
            })?;

        tracing::info!(%tag_id, name = %tag.name, "renamed tag");
        Ok(tag)
    }

    /// Removes the tag from every recipe and deletes it.
    pub async fn delete(&self, tag_id: TagId) -> Result<(), TagsServiceError> {
        crud::<Tag, _>(&self.db)
            .delete(Condition::all().add(TagColumn::TagId.eq(tag_id)))
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => TagsServiceError::TagNotFound,
                other => other.into(),
            })?;
        tracing::info!(%tag_id, "deleted tag");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TagModel>, TagsServiceError> {
        Ok(crud::<Tag, _>(&self.db)
            .find_many(FindMany::new().order_by_asc(TagColumn::Name))
            .await?)
    }

    /// Tags `recipe_id` with `name`, creating the tag if needed. Tagging twice is a no-op.
    pub async fn tag_recipe(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        name: &str,
    ) -> Result<TagModel, TagsServiceError> {
        let name = normalize_tag_name(name).ok_or(TagsServiceError::InvalidName)?;
        self.owned_recipe(actor, recipe_id).await?;

        let tag = ensure_tag_on(&self.db, &name).await?;
        crud::<RecipeTag, _>(&self.db)
            .create_many(
                vec![RecipeTagActiveModel {
                    recipe_id: Set(recipe_id),
                    tag_id: Set(tag.tag_id),
                }],
                true,
            )
            .await?;

        tracing::debug!(%recipe_id, tag = %tag.name, "tagged recipe");
        Ok(tag)
    }

    /// Returns whether the recipe carried the tag.
    pub async fn untag_recipe(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        tag_id: TagId,
    ) -> Result<bool, TagsServiceError> {
        self.owned_recipe(actor, recipe_id).await?;
        let removed = crud::<RecipeTag, _>(&self.db)
            .delete_many(
                Condition::all()
                    .add(RecipeTagColumn::RecipeId.eq(recipe_id))
                    .add(RecipeTagColumn::TagId.eq(tag_id)),
            )
            .await?;
        Ok(removed > 0)
    }

    pub async fn tags_for_recipe(&self, recipe_id: RecipeId) -> Result<Vec<TagModel>, TagsServiceError> {
        Ok(tags_for_recipe_on(&self.db, recipe_id).await?)
    }

    /// Recipes carrying the tag that `viewer` may see, newest first.
    pub async fn recipes_with_tag(
        &self,
        viewer: Option<UserId>,
        name: &str,
    ) -> Result<Vec<RecipeModel>, TagsServiceError> {
        let Some(tag) = self.find_by_name(name).await? else {
            return Ok(Vec::new());
        };

        let recipes = Recipe::find()
            .inner_join(RecipeTag)
            .filter(RecipeTagColumn::TagId.eq(tag.tag_id))
            .filter(visible_to(viewer))
            .order_by_desc(RecipeColumn::CreatedAt)
            .order_by_desc(RecipeColumn::RecipeId)
            .all(&self.db)
            .await?;
        Ok(recipes)
    }

    /// Most used tags first, with the number of recipes carrying each.
    pub async fn popular(&self, limit: u64) -> Result<Vec<(TagModel, u64)>, TagsServiceError> {
        let groups = crud::<RecipeTag, _>(&self.db)
            .group_by::<TagId>(
                GroupBy::new([RecipeTagColumn::TagId])
                    .order_by_count(Order::Desc)
                    .take(limit),
            )
            .await?;

        let ids: Vec<TagId> = groups.iter().map(|g| g.key).collect();
        let mut tags: HashMap<TagId, TagModel> = crud::<Tag, _>(&self.db)
            .find_many(FindMany::new().filter(TagColumn::TagId.is_in(ids)))
            .await?
            .into_iter()
            .map(|tag| (tag.tag_id, tag))
            .collect();

        Ok(groups
            .into_iter()
            .filter_map(|group| {
                let count = group.count();
                tags.remove(&group.key).map(|tag| (tag, count))
            })
            .collect())
    }
}

pub(crate) async fn tags_for_recipe_on<C: ConnectionTrait>(
    db: &C,
    recipe_id: RecipeId,
) -> Result<Vec<TagModel>, QueryError> {
    Ok(Tag::find()
        .inner_join(RecipeTag)
        .filter(RecipeTagColumn::RecipeId.eq(recipe_id))
        .order_by_asc(TagColumn::Name)
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    async fn setup_test_service() -> (TagsService, DatabaseConnection) {
        let db = test_utils::setup_test_db().await;
        (TagsService::new(db.clone()), db)
    }

    #[test]
    fn test_normalize_tag_name() {
        assert_eq!(normalize_tag_name("  Vegan "), Some("vegan".to_string()));
        assert_eq!(normalize_tag_name("   "), None);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (service, _) = setup_test_service().await;

        let first = service.ensure("Gluten Free").await.unwrap();
        let second = service.ensure("gluten free  ").await.unwrap();

        assert_eq!(first.tag_id, second.tag_id);
        assert_eq!(first.name, "gluten free");
        assert_eq!(service.list().await.unwrap().len(), 1);

        let empty = service.ensure(" ").await;
        assert!(matches!(empty, Err(TagsServiceError::InvalidName)));
    }

    #[tokio::test]
    async fn test_ensure_inside_transaction_skips_existing_name() {
        let (service, db) = setup_test_service().await;
        let existing = service.ensure("weeknight").await.unwrap();

        let (inserted, ensured, created) = crate::transaction::run_transaction(
            &db,
            crate::transaction::TransactionOptions::default(),
            |txn| {
                Box::pin(async move {
                    // Same path a lost race takes: the insert conflicts and is skipped.
                    let inserted = crud::<Tag, _>(txn)
                        .create_many(
                            vec![TagActiveModel {
                                name: Set("weeknight".to_string()),
                                ..Default::default()
                            }],
                            true,
                        )
                        .await?;
                    let ensured = ensure_tag_on(txn, "weeknight").await?;
                    let created = ensure_tag_on(txn, "one-pot").await?;
                    Ok::<_, QueryError>((inserted, ensured, created))
                })
            },
        )
        .await
        .unwrap();

        assert_eq!(inserted, 0);
        assert_eq!(ensured.tag_id, existing.tag_id);
        let found = service.find_by_name("one-pot").await.unwrap().unwrap();
        assert_eq!(found.tag_id, created.tag_id);
        assert_eq!(service.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (service, _) = setup_test_service().await;
        let quick = service.ensure("quick").await.unwrap();
        service.ensure("easy").await.unwrap();

        let renamed = service.rename(quick.tag_id, "Fast").await.unwrap();
        assert_eq!(renamed.name, "fast");

        let clash = service.rename(quick.tag_id, "easy").await;
        assert!(matches!(clash, Err(TagsServiceError::TagExists)));

        service.delete(quick.tag_id).await.unwrap();
        let names: Vec<String> = service.list().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["easy"]);

        let missing = service.delete(quick.tag_id).await;
        assert!(matches!(missing, Err(TagsServiceError::TagNotFound)));
    }

    #[tokio::test]
    async fn test_tag_and_untag_recipe() {
        let (service, db) = setup_test_service().await;
        let owner = test_utils::create_test_user(&db, "owner").await;
        let stranger = test_utils::create_test_user(&db, "stranger").await;
        let recipe = test_utils::create_test_recipe(&db, owner.user_id, "Dal", true).await;

        let spicy = service.tag_recipe(owner.user_id, recipe.recipe_id, "Spicy").await.unwrap();
        service.tag_recipe(owner.user_id, recipe.recipe_id, "spicy").await.unwrap();
        service.tag_recipe(owner.user_id, recipe.recipe_id, "lentils").await.unwrap();

        let names: Vec<String> = service
            .tags_for_recipe(recipe.recipe_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["lentils", "spicy"]);

        let denied = service.tag_recipe(stranger.user_id, recipe.recipe_id, "bland").await;
        assert!(matches!(denied, Err(TagsServiceError::NotRecipeOwner)));

        let missing = service.tag_recipe(owner.user_id, RecipeId::new(), "x").await;
        assert!(matches!(missing, Err(TagsServiceError::RecipeNotFound)));

        assert!(service.untag_recipe(owner.user_id, recipe.recipe_id, spicy.tag_id).await.unwrap());
        assert!(!service.untag_recipe(owner.user_id, recipe.recipe_id, spicy.tag_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_recipe_tag_pair_rejected() {
        let (service, db) = setup_test_service().await;
        let owner = test_utils::create_test_user(&db, "owner").await;
        let recipe = test_utils::create_test_recipe(&db, owner.user_id, "Salad", true).await;
        let tag = service.ensure("fresh").await.unwrap();

        let pair = || RecipeTagActiveModel {
            recipe_id: Set(recipe.recipe_id),
            tag_id: Set(tag.tag_id),
        };
        RecipeTag::insert(pair()).exec(&db).await.unwrap();
        let err = RecipeTag::insert(pair()).exec(&db).await.unwrap_err();

        assert!(QueryError::from(err).is_unique_violation());
    }

    #[tokio::test]
    async fn test_recipes_with_tag_respects_visibility() {
        let (service, db) = setup_test_service().await;
        let owner = test_utils::create_test_user(&db, "owner").await;
        let other = test_utils::create_test_user(&db, "other").await;
        let public = test_utils::create_test_recipe(&db, owner.user_id, "Public pie", true).await;
        let private = test_utils::create_test_recipe(&db, owner.user_id, "Secret pie", false).await;
        for recipe in [&public, &private] {
            service.tag_recipe(owner.user_id, recipe.recipe_id, "pie").await.unwrap();
        }

        let anonymous: Vec<RecipeId> = service
            .recipes_with_tag(None, "pie")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.recipe_id)
            .collect();
        assert_eq!(anonymous, vec![public.recipe_id]);

        let as_other = service.recipes_with_tag(Some(other.user_id), "PIE").await.unwrap();
        assert_eq!(as_other.len(), 1);

        let as_owner = service.recipes_with_tag(Some(owner.user_id), "pie").await.unwrap();
        assert_eq!(as_owner.len(), 2);

        assert!(service.recipes_with_tag(None, "cake").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_popular_tags() {
        let (service, db) = setup_test_service().await;
        let owner = test_utils::create_test_user(&db, "owner").await;
        for (title, tags) in [
            ("Curry", vec!["spicy", "dinner"]),
            ("Chili", vec!["spicy", "dinner"]),
            ("Salsa", vec!["spicy"]),
            ("Toast", vec!["breakfast"]),
        ] {
            let recipe = test_utils::create_test_recipe(&db, owner.user_id, title, true).await;
            for tag in tags {
                service.tag_recipe(owner.user_id, recipe.recipe_id, tag).await.unwrap();
            }
        }
        service.ensure("unused").await.unwrap();

        let popular: Vec<(String, u64)> = service
            .popular(2)
            .await
            .unwrap()
            .into_iter()
            .map(|(tag, count)| (tag.name, count))
            .collect();
        assert_eq!(popular, vec![("spicy".to_string(), 3), ("dinner".to_string(), 2)]);
    }
}
