use sea_orm::{DatabaseConnection, QueryTrait};
use serde::Serialize;
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::{RecipeId, ReviewId, UserId},
    query::{crud, Aggregate, FindMany, GroupBy},
    service::recipes::can_view,
};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

#[derive(Debug, Error)]
pub enum ReviewsServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("review not found")]
    ReviewNotFound,

    #[error("recipe not found")]
    RecipeNotFound,

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i32),

    #[error("authors cannot review their own recipe")]
    OwnRecipe,

    #[error("unauthorized: not review author")]
    NotReviewAuthor,
}

impl From<DbErr> for ReviewsServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

/// Aggregate view of a recipe's ratings. Averages are `None` with no reviews.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatingSummary {
    pub count: u64,
    pub average: Option<f64>,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

pub(crate) async fn rating_summary_on<C: ConnectionTrait>(
    db: &C,
    recipe_id: RecipeId,
) -> Result<RatingSummary, QueryError> {
    let result = crud::<Review, _>(db)
        .aggregate(
            Aggregate::new()
                .filter(ReviewColumn::RecipeId.eq(recipe_id))
                .count()
                .avg(ReviewColumn::Rating)
                .min(ReviewColumn::Rating)
                .max(ReviewColumn::Rating),
        )
        .await?;

    Ok(RatingSummary {
        count: result.count.unwrap_or_default(),
        average: result.avg(ReviewColumn::Rating),
        min: result.min(ReviewColumn::Rating).map(|v| v.round() as i32),
        max: result.max(ReviewColumn::Rating).map(|v| v.round() as i32),
    })
}

/// Per-recipe rating average and review count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeRating {
    pub recipe_id: RecipeId,
    pub average: f64,
    pub count: u64,
}

#[derive(Clone)]
pub struct ReviewsService {
    db: DatabaseConnection,
}

impl ReviewsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates or replaces `user_id`'s review of the recipe.
    pub async fn review(
        &self,
        user_id: UserId,
        recipe_id: RecipeId,
        rating: i32,
        comment: Option<String>,
    ) -> Result<ReviewModel, ReviewsServiceError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(ReviewsServiceError::InvalidRating(rating));
        }

        let recipe = crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .ok_or(ReviewsServiceError::RecipeNotFound)?;
        if recipe.user_id == user_id {
            return Err(ReviewsServiceError::OwnRecipe);
        }
        if !recipe.is_public {
            return Err(ReviewsServiceError::RecipeNotFound);
        }

        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let review = crud::<Review, _>(&self.db)
            .upsert(
                Condition::all()
                    .add(ReviewColumn::UserId.eq(user_id))
                    .add(ReviewColumn::RecipeId.eq(recipe_id)),
                ReviewActiveModel {
                    user_id: Set(user_id),
                    recipe_id: Set(recipe_id),
                    rating: Set(rating),
                    comment: Set(comment.clone()),
                    ..Default::default()
                },
                ReviewActiveModel {
                    rating: Set(rating),
                    comment: Set(comment),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| match err {
                QueryError::ForeignKeyViolation(_) => ReviewsServiceError::RecipeNotFound,
                other => other.into(),
            })?;

        tracing::info!(review_id = %review.review_id, %recipe_id, rating, "saved review");
        Ok(review)
    }

    pub async fn get(&self, review_id: ReviewId) -> Result<ReviewModel, ReviewsServiceError> {
        crud::<Review, _>(&self.db)
            .find_by_id(review_id)
            .await?
            .ok_or(ReviewsServiceError::ReviewNotFound)
    }

    pub async fn delete(&self, actor: UserId, review_id: ReviewId) -> Result<(), ReviewsServiceError> {
        let review = self.get(review_id).await?;
        if review.user_id != actor {
            return Err(ReviewsServiceError::NotReviewAuthor);
        }

        crud::<Review, _>(&self.db)
            .delete(Condition::all().add(ReviewColumn::ReviewId.eq(review_id)))
            .await?;
        tracing::info!(%review_id, "deleted review");
        Ok(())
    }

    /// Newest first. Reviews of recipes `viewer` cannot see are hidden.
    pub async fn list_for_recipe(
        &self,
        viewer: Option<UserId>,
        recipe_id: RecipeId,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<ReviewModel>, ReviewsServiceError> {
        let recipe = crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .filter(|recipe| can_view(recipe, viewer))
            .ok_or(ReviewsServiceError::RecipeNotFound)?;

        Ok(crud::<Review, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(ReviewColumn::RecipeId.eq(recipe.recipe_id))
                    .order_by_desc(ReviewColumn::CreatedAt)
                    .order_by_desc(ReviewColumn::ReviewId)
                    .page(page, per_page),
            )
            .await?)
    }

    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<ReviewModel>, ReviewsServiceError> {
        Ok(crud::<Review, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(ReviewColumn::UserId.eq(user_id))
                    .order_by_desc(ReviewColumn::CreatedAt),
            )
            .await?)
    }

    pub async fn rating_summary(&self, recipe_id: RecipeId) -> Result<RatingSummary, ReviewsServiceError> {
        Ok(rating_summary_on(&self.db, recipe_id).await?)
    }

    /// Average rating of each listed recipe that has at least one review.
    pub async fn average_ratings(
        &self,
        recipe_ids: Vec<RecipeId>,
    ) -> Result<Vec<RecipeRating>, ReviewsServiceError> {
        if recipe_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.rating_groups(
            GroupBy::new([ReviewColumn::RecipeId]).filter(ReviewColumn::RecipeId.is_in(recipe_ids)),
        )
        .await
    }

    /// Public recipes with at least `min_reviews` reviews, best average first.
    /// Ties go to the recipe with more reviews.
    pub async fn top_rated(
        &self,
        min_reviews: u64,
        limit: usize,
    ) -> Result<Vec<RecipeRating>, ReviewsServiceError> {
        let public_recipes = Recipe::find()
            .select_only()
            .column(RecipeColumn::RecipeId)
            .filter(RecipeColumn::IsPublic.eq(true))
            .into_query();

        let mut ratings = self
            .rating_groups(
                GroupBy::new([ReviewColumn::RecipeId])
                    .filter(ReviewColumn::RecipeId.in_subquery(public_recipes))
                    .having_count_gte(min_reviews.max(1)),
            )
            .await?;

        ratings.sort_by(|a, b| {
            b.average
                .total_cmp(&a.average)
                .then(b.count.cmp(&a.count))
                .then(a.recipe_id.cmp(&b.recipe_id))
        });
        ratings.truncate(limit);
        Ok(ratings)
    }

    async fn rating_groups(
        &self,
        group_by: GroupBy<Review>,
    ) -> Result<Vec<RecipeRating>, ReviewsServiceError> {
        let groups = crud::<Review, _>(&self.db)
            .group_by::<RecipeId>(group_by.avg(ReviewColumn::Rating))
            .await?;

        Ok(groups
            .into_iter()
            .map(|group| RecipeRating {
                recipe_id: group.key,
                average: group.aggregates.avg(ReviewColumn::Rating).unwrap_or_default(),
                count: group.count(),
            })
            .collect())
    }
}
