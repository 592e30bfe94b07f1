use std::collections::HashSet;

use sea_orm::{
    sea_query::{Expr, Func},
    DatabaseConnection,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::{IngredientId, RecipeId, StepId, UserId},
    query::{contains_pattern, crud, FindMany, GroupBy},
    service::{
        ingredients::{clean_ingredient, find_or_create_on},
        reviews::{rating_summary_on, RatingSummary},
        tags::{ensure_tag_on, normalize_tag_name, tags_for_recipe_on},
    },
    transaction::{run_transaction, TransactionError, TransactionOptions},
};

#[derive(Debug, Error)]
pub enum RecipesServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("recipe not found")]
    RecipeNotFound,

    #[error("step not found")]
    StepNotFound,

    #[error("ingredient is not part of this recipe")]
    IngredientNotInRecipe,

    #[error("unauthorized: not recipe author")]
    NotRecipeOwner,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<DbErr> for RecipesServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

/// Recipes `viewer` may see: every public recipe plus their own.
pub(crate) fn visible_to(viewer: Option<UserId>) -> Condition {
    let condition = Condition::any().add(RecipeColumn::IsPublic.eq(true));
    match viewer {
        Some(viewer) => condition.add(RecipeColumn::UserId.eq(viewer)),
        None => condition,
    }
}

pub(crate) fn can_view(recipe: &RecipeModel, viewer: Option<UserId>) -> bool {
    recipe.is_public || viewer == Some(recipe.user_id)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngredientLineInput {
    pub name: String,
    pub unit: Option<String>,
    pub quantity: Option<String>,
}

/// Everything needed to publish a recipe in one go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub prep_time: Option<i32>,
    pub cook_time: Option<i32>,
    pub servings: Option<i32>,
    /// Instructions in order; numbered from 1.
    pub steps: Vec<String>,
    pub ingredients: Vec<IngredientLineInput>,
    pub tags: Vec<String>,
}

/// Partial update. Outer `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub prep_time: Option<Option<i32>>,
    pub cook_time: Option<Option<i32>>,
    pub servings: Option<Option<i32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientLine {
    pub ingredient: IngredientModel,
    pub quantity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeDetail {
    pub recipe: RecipeModel,
    pub author: String,
    pub steps: Vec<StepModel>,
    pub ingredients: Vec<IngredientLine>,
    pub tags: Vec<TagModel>,
    pub rating: RatingSummary,
}

fn clean_title(title: &str) -> Result<String, RecipesServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(RecipesServiceError::InvalidInput("title is empty".into()));
    }
    Ok(title.to_string())
}

fn check_minutes(field: &str, minutes: Option<i32>) -> Result<(), RecipesServiceError> {
    match minutes {
        Some(m) if m < 0 => Err(RecipesServiceError::InvalidInput(format!(
            "{field} cannot be negative"
        ))),
        _ => Ok(()),
    }
}

fn check_servings(servings: Option<i32>) -> Result<(), RecipesServiceError> {
    match servings {
        Some(s) if s <= 0 => Err(RecipesServiceError::InvalidInput(
            "servings must be positive".into(),
        )),
        _ => Ok(()),
    }
}

fn clean_instruction(instruction: &str) -> Result<String, RecipesServiceError> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err(RecipesServiceError::InvalidInput("step instruction is empty".into()));
    }
    Ok(instruction.to_string())
}

fn clean_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Moves every step at `from` or later by `delta`. Runs in two passes through
/// negative numbers so the (recipe_id, step_number) index never sees a clash.
async fn shift_steps<C: ConnectionTrait>(
    db: &C,
    recipe_id: RecipeId,
    from: i32,
    delta: i32,
) -> Result<(), DbErr> {
    Step::update_many()
        .col_expr(
            StepColumn::StepNumber,
            Expr::val(-delta).sub(Expr::col(StepColumn::StepNumber)),
        )
        .filter(StepColumn::RecipeId.eq(recipe_id))
        .filter(StepColumn::StepNumber.gte(from))
        .exec(db)
        .await?;

    Step::update_many()
        .col_expr(
            StepColumn::StepNumber,
            Expr::val(0).sub(Expr::col(StepColumn::StepNumber)),
        )
        .filter(StepColumn::RecipeId.eq(recipe_id))
        .filter(StepColumn::StepNumber.lt(0))
        .exec(db)
        .await?;

    Ok(())
}

async fn steps_on<C: ConnectionTrait>(db: &C, recipe_id: RecipeId) -> Result<Vec<StepModel>, QueryError> {
    crud::<Step, _>(db)
        .find_many(
            FindMany::new()
                .filter(StepColumn::RecipeId.eq(recipe_id))
                .order_by_asc(StepColumn::StepNumber),
        )
        .await
}

#[derive(Clone)]
pub struct RecipesService {
    db: DatabaseConnection,
}

impl RecipesService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn owned_recipe(&self, actor: UserId, recipe_id: RecipeId) -> Result<RecipeModel, RecipesServiceError> {
        let recipe = crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .ok_or(RecipesServiceError::RecipeNotFound)?;
        if recipe.user_id != actor {
            return Err(RecipesServiceError::NotRecipeOwner);
        }
        Ok(recipe)
    }

    async fn owned_step(&self, actor: UserId, step_id: StepId) -> Result<StepModel, RecipesServiceError> {
        let step = crud::<Step, _>(&self.db)
            .find_by_id(step_id)
            .await?
            .ok_or(RecipesServiceError::StepNotFound)?;
        self.owned_recipe(actor, step.recipe_id).await?;
        Ok(step)
    }

    /// Inserts the recipe with its steps, ingredient lines and tags atomically.
    /// Unknown ingredients and tags are created on the way.
    pub async fn create(&self, author: UserId, input: NewRecipe) -> Result<RecipeModel, RecipesServiceError> {
        let title = clean_title(&input.title)?;
        check_minutes("prep_time", input.prep_time)?;
        check_minutes("cook_time", input.cook_time)?;
        check_servings(input.servings)?;

        let steps = input
            .steps
            .iter()
            .map(|s| clean_instruction(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(input.ingredients.len());
        for line in &input.ingredients {
            let (name, unit) = clean_ingredient(&line.name, line.unit.as_deref())
                .ok_or_else(|| RecipesServiceError::InvalidInput("ingredient name is empty".into()))?;
            if !seen.insert((name.clone(), unit.clone())) {
                return Err(RecipesServiceError::InvalidInput(format!(
                    "ingredient listed twice: {name}"
                )));
            }
            lines.push((name, unit, clean_text(line.quantity.clone())));
        }

        let tags: Vec<String> = input
            .tags
            .iter()
            .filter_map(|t| normalize_tag_name(t))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let recipe = RecipeActiveModel {
            user_id: Set(author),
            title: Set(title),
            description: Set(clean_text(input.description)),
            is_public: Set(input.is_public),
            prep_time: Set(input.prep_time),
            cook_time: Set(input.cook_time),
            servings: Set(input.servings),
            ..Default::default()
        };

        let created = run_transaction(&self.db, TransactionOptions::default(), move |txn| {
            Box::pin(async move {
                let recipe = crud::<Recipe, _>(txn).create(recipe).await.map_err(|err| match err {
                    QueryError::ForeignKeyViolation(_) => {
                        RecipesServiceError::InvalidInput("author does not exist".into())
                    }
                    other => other.into(),
                })?;
                let recipe_id = recipe.recipe_id;

                let step_rows = steps
                    .into_iter()
                    .zip(1..)
                    .map(|(instruction, number)| StepActiveModel {
                        recipe_id: Set(recipe_id),
                        step_number: Set(number),
                        instruction: Set(instruction),
                        ..Default::default()
                    })
                    .collect();
                crud::<Step, _>(txn).create_many(step_rows, false).await?;

                let mut ingredient_rows = Vec::with_capacity(lines.len());
                for (name, unit, quantity) in lines {
                    let ingredient = find_or_create_on(txn, name, unit).await?;
                    ingredient_rows.push(RecipeIngredientActiveModel {
                        recipe_id: Set(recipe_id),
                        ingredient_id: Set(ingredient.ingredient_id),
                        quantity: Set(quantity),
                    });
                }
                crud::<RecipeIngredient, _>(txn)
                    .create_many(ingredient_rows, false)
                    .await?;

                let mut tag_rows = Vec::with_capacity(tags.len());
                for name in &tags {
                    let tag = ensure_tag_on(txn, name).await?;
                    tag_rows.push(RecipeTagActiveModel {
                        recipe_id: Set(recipe_id),
                        tag_id: Set(tag.tag_id),
                    });
                }
                crud::<RecipeTag, _>(txn).create_many(tag_rows, true).await?;

                Ok::<_, RecipesServiceError>(recipe)
            })
        })
        .await
        .map_err(TransactionError::into_inner)?;

        tracing::info!(recipe_id = %created.recipe_id, %author, title = %created.title, "created recipe");
        Ok(created)
    }

    /// Private recipes are reported missing to everyone but their author.
    pub async fn get(&self, viewer: Option<UserId>, recipe_id: RecipeId) -> Result<RecipeModel, RecipesServiceError> {
        crud::<Recipe, _>(&self.db)
            .find_by_id(recipe_id)
            .await?
            .filter(|recipe| can_view(recipe, viewer))
            .ok_or(RecipesServiceError::RecipeNotFound)
    }

    pub async fn detail(&self, viewer: Option<UserId>, recipe_id: RecipeId) -> Result<RecipeDetail, RecipesServiceError> {
        let recipe = self.get(viewer, recipe_id).await?;

        let author = crud::<User, _>(&self.db)
            .find_by_id(recipe.user_id)
            .await?
            .map(|user| user.username)
            .unwrap_or_default();

        let steps = steps_on(&self.db, recipe_id).await?;

        let ingredients = RecipeIngredient::find()
            .filter(RecipeIngredientColumn::RecipeId.eq(recipe_id))
            .find_also_related(Ingredient)
            .order_by_asc(IngredientColumn::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .filter_map(|(line, ingredient)| {
                ingredient.map(|ingredient| IngredientLine {
                    ingredient,
                    quantity: line.quantity,
                })
            })
            .collect();

        let tags = tags_for_recipe_on(&self.db, recipe_id).await?;
        let rating = rating_summary_on(&self.db, recipe_id).await?;

        Ok(RecipeDetail {
            recipe,
            author,
            steps,
            ingredients,
            tags,
            rating,
        })
    }

    pub async fn update(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        changes: RecipeChanges,
    ) -> Result<RecipeModel, RecipesServiceError> {
        let mut active = <RecipeActiveModel as Default>::default();
        if let Some(title) = &changes.title {
            active.title = Set(clean_title(title)?);
        }
        if let Some(description) = changes.description {
            active.description = Set(clean_text(description));
        }
        if let Some(prep_time) = changes.prep_time {
            check_minutes("prep_time", prep_time)?;
            active.prep_time = Set(prep_time);
        }
        if let Some(cook_time) = changes.cook_time {
            check_minutes("cook_time", cook_time)?;
            active.cook_time = Set(cook_time);
        }
        if let Some(servings) = changes.servings {
            check_servings(servings)?;
            active.servings = Set(servings);
        }

        self.owned_recipe(actor, recipe_id).await?;
        let recipe = crud::<Recipe, _>(&self.db)
            .update(Condition::all().add(RecipeColumn::RecipeId.eq(recipe_id)), active)
            .await?;

        tracing::debug!(%recipe_id, "updated recipe");
        Ok(recipe)
    }

    pub async fn set_visibility(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        is_public: bool,
    ) -> Result<RecipeModel, RecipesServiceError> {
        self.owned_recipe(actor, recipe_id).await?;
        let recipe = crud::<Recipe, _>(&self.db)
            .update(
                Condition::all().add(RecipeColumn::RecipeId.eq(recipe_id)),
                RecipeActiveModel {
                    is_public: Set(is_public),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(%recipe_id, is_public, "changed recipe visibility");
        Ok(recipe)
    }

    /// Deletes the recipe with its steps, ingredient lines, tags, reviews and
    /// collection entries.
    pub async fn delete(&self, actor: UserId, recipe_id: RecipeId) -> Result<(), RecipesServiceError> {
        self.owned_recipe(actor, recipe_id).await?;
        crud::<Recipe, _>(&self.db)
            .delete(Condition::all().add(RecipeColumn::RecipeId.eq(recipe_id)))
            .await?;
        tracing::info!(%recipe_id, "deleted recipe");
        Ok(())
    }

    /// Public recipes, newest first.
    pub async fn list_public(&self, page: u64, per_page: u64) -> Result<Vec<RecipeModel>, RecipesServiceError> {
        Ok(crud::<Recipe, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(RecipeColumn::IsPublic.eq(true))
                    .order_by_desc(RecipeColumn::CreatedAt)
                    .order_by_desc(RecipeColumn::RecipeId)
                    .page(page, per_page),
            )
            .await?)
    }

    pub async fn count_public(&self) -> Result<u64, RecipesServiceError> {
        Ok(crud::<Recipe, _>(&self.db)
            .count(Condition::all().add(RecipeColumn::IsPublic.eq(true)))
            .await?)
    }

    /// `author`'s recipes that `viewer` may see, newest first.
    pub async fn list_by_author(
        &self,
        viewer: Option<UserId>,
        author: UserId,
    ) -> Result<Vec<RecipeModel>, RecipesServiceError> {
        Ok(crud::<Recipe, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(RecipeColumn::UserId.eq(author))
                    .filter(visible_to(viewer))
                    .order_by_desc(RecipeColumn::CreatedAt)
                    .order_by_desc(RecipeColumn::RecipeId),
            )
            .await?)
    }

    /// Case-insensitive title search over public recipes.
    pub async fn search_public(&self, query: &str, limit: u64) -> Result<Vec<RecipeModel>, RecipesServiceError> {
        let pattern = contains_pattern(&query.trim().to_lowercase());
        Ok(crud::<Recipe, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(RecipeColumn::IsPublic.eq(true))
                    .filter(
                        Expr::expr(Func::lower(Expr::col((Recipe, RecipeColumn::Title))))
                            .like(pattern),
                    )
                    .order_by_asc(RecipeColumn::Title)
                    .take(limit),
            )
            .await?)
    }

    pub async fn steps(&self, viewer: Option<UserId>, recipe_id: RecipeId) -> Result<Vec<StepModel>, RecipesServiceError> {
        self.get(viewer, recipe_id).await?;
        Ok(steps_on(&self.db, recipe_id).await?)
    }

    /// Inserts a step at `position` (1-based), or appends it when `position`
    /// is `None` or past the end. Later steps move down by one.
    pub async fn add_step(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        instruction: &str,
        position: Option<i32>,
    ) -> Result<StepModel, RecipesServiceError> {
        let instruction = clean_instruction(instruction)?;
        self.owned_recipe(actor, recipe_id).await?;

        let step = run_transaction(&self.db, TransactionOptions::default(), move |txn| {
            Box::pin(async move {
                let steps = crud::<Step, _>(txn);
                let count = steps
                    .count(Condition::all().add(StepColumn::RecipeId.eq(recipe_id)))
                    .await?;
                let next = i32::try_from(count).unwrap_or(i32::MAX).saturating_add(1);
                let number = match position {
                    Some(p) if p < 1 => {
                        return Err(RecipesServiceError::InvalidInput(
                            "step position starts at 1".into(),
                        ))
                    }
                    Some(p) => p.min(next),
                    None => next,
                };

                if number < next {
                    shift_steps(txn, recipe_id, number, 1).await?;
                }

                Ok(steps
                    .create(StepActiveModel {
                        recipe_id: Set(recipe_id),
                        step_number: Set(number),
                        instruction: Set(instruction),
                        ..Default::default()
                    })
                    .await?)
            })
        })
        .await
        .map_err(TransactionError::into_inner)?;

        tracing::debug!(%recipe_id, step = step.step_number, "added step");
        Ok(step)
    }

    pub async fn update_step(
        &self,
        actor: UserId,
        step_id: StepId,
        instruction: &str,
    ) -> Result<StepModel, RecipesServiceError> {
        let instruction = clean_instruction(instruction)?;
        let step = self.owned_step(actor, step_id).await?;

        let mut active = step.into_active_model();
        active.instruction = Set(instruction);
        Ok(active.update(&self.db).await?)
    }

    /// Removes a step and closes the gap it leaves.
    pub async fn remove_step(&self, actor: UserId, step_id: StepId) -> Result<(), RecipesServiceError> {
        let step = self.owned_step(actor, step_id).await?;
        let (recipe_id, number) = (step.recipe_id, step.step_number);

        run_transaction(&self.db, TransactionOptions::default(), move |txn| {
            Box::pin(async move {
                crud::<Step, _>(txn)
                    .delete(Condition::all().add(StepColumn::StepId.eq(step_id)))
                    .await?;
                shift_steps(txn, recipe_id, number + 1, -1).await?;
                Ok::<_, RecipesServiceError>(())
            })
        })
        .await
        .map_err(TransactionError::into_inner)?;

        tracing::debug!(%recipe_id, %step_id, "removed step");
        Ok(())
    }

    /// Adds the ingredient to the recipe, or changes its quantity if already listed.
    pub async fn set_ingredient(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        line: IngredientLineInput,
    ) -> Result<IngredientLine, RecipesServiceError> {
        let (name, unit) = clean_ingredient(&line.name, line.unit.as_deref())
            .ok_or_else(|| RecipesServiceError::InvalidInput("ingredient name is empty".into()))?;
        let quantity = clean_text(line.quantity);
        self.owned_recipe(actor, recipe_id).await?;

        let ingredient = find_or_create_on(&self.db, name, unit).await?;
        let row = crud::<RecipeIngredient, _>(&self.db)
            .upsert(
                Condition::all()
                    .add(RecipeIngredientColumn::RecipeId.eq(recipe_id))
                    .add(RecipeIngredientColumn::IngredientId.eq(ingredient.ingredient_id)),
                RecipeIngredientActiveModel {
                    recipe_id: Set(recipe_id),
                    ingredient_id: Set(ingredient.ingredient_id),
                    quantity: Set(quantity.clone()),
                },
                RecipeIngredientActiveModel {
                    quantity: Set(quantity),
                    ..Default::default()
                },
            )
            .await?;

        Ok(IngredientLine {
            ingredient,
            quantity: row.quantity,
        })
    }

    pub async fn remove_ingredient(
        &self,
        actor: UserId,
        recipe_id: RecipeId,
        ingredient_id: IngredientId,
    ) -> Result<(), RecipesServiceError> {
        self.owned_recipe(actor, recipe_id).await?;
        crud::<RecipeIngredient, _>(&self.db)
            .delete(
                Condition::all()
                    .add(RecipeIngredientColumn::RecipeId.eq(recipe_id))
                    .add(RecipeIngredientColumn::IngredientId.eq(ingredient_id)),
            )
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => RecipesServiceError::IngredientNotInRecipe,
                other => other.into(),
            })?;
        Ok(())
    }

    /// Number of public recipes per author, most prolific first.
    pub async fn counts_by_author(&self, limit: u64) -> Result<Vec<(UserId, u64)>, RecipesServiceError> {
        let groups = crud::<Recipe, _>(&self.db)
            .group_by::<UserId>(
                GroupBy::new([RecipeColumn::UserId])
                    .filter(RecipeColumn::IsPublic.eq(true))
                    .order_by_count(Order::Desc)
                    .take(limit),
            )
            .await?;
        Ok(groups.into_iter().map(|g| (g.key, g.count())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    struct Fixture {
        service: RecipesService,
        db: DatabaseConnection,
        cook: UserModel,
    }

    async fn setup() -> Fixture {
        let db = test_utils::setup_test_db().await;
        let cook = test_utils::create_test_user(&db, "cook").await;
        Fixture {
            service: RecipesService::new(db.clone()),
            db,
            cook,
        }
    }

    fn line(name: &str, unit: Option<&str>, quantity: &str) -> IngredientLineInput {
        IngredientLineInput {
            name: name.into(),
            unit: unit.map(Into::into),
            quantity: Some(quantity.into()),
        }
    }

    fn pancakes() -> NewRecipe {
        NewRecipe {
            title: "  Pancakes ".into(),
            description: Some("Fluffy".into()),
            is_public: true,
            prep_time: Some(10),
            cook_time: Some(15),
            servings: Some(4),
            steps: vec!["Whisk".into(), "Rest".into(), "Fry".into()],
            ingredients: vec![
                line("flour", Some("g"), "200"),
                line("milk", Some("ml"), "300"),
                line("egg", None, "2"),
            ],
            tags: vec!["Breakfast".into(), "breakfast ".into(), "sweet".into()],
        }
    }

    fn step_texts(steps: &[StepModel]) -> Vec<(i32, String)> {
        steps
            .iter()
            .map(|s| (s.step_number, s.instruction.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_detail() {
        let f = setup().await;

        let recipe = f.service.create(f.cook.user_id, pancakes()).await.unwrap();
        assert_eq!(recipe.title, "Pancakes");
        assert!(recipe.is_public);

        let detail = f.service.detail(None, recipe.recipe_id).await.unwrap();
        assert_eq!(detail.author, "cook");
        assert_eq!(
            step_texts(&detail.steps),
            vec![(1, "Whisk".into()), (2, "Rest".into()), (3, "Fry".into())]
        );

        let ingredients: Vec<(String, Option<String>)> = detail
            .ingredients
            .iter()
            .map(|l| (l.ingredient.name.clone(), l.quantity.clone()))
            .collect();
        assert_eq!(
            ingredients,
            vec![
                ("egg".into(), Some("2".into())),
                ("flour".into(), Some("200".into())),
                ("milk".into(), Some("300".into())),
            ]
        );

        let tags: Vec<String> = detail.tags.iter().map(|t| t.name.clone()).collect();
        assert_eq!(tags, vec!["breakfast", "sweet"]);
        assert_eq!(detail.rating.count, 0);
    }

    #[tokio::test]
    async fn test_create_reuses_ingredients_and_tags() {
        let f = setup().await;
        f.service.create(f.cook.user_id, pancakes()).await.unwrap();
        f.service
            .create(
                f.cook.user_id,
                NewRecipe {
                    title: "Crepes".into(),
                    ingredients: vec![line("flour", Some("g"), "100")],
                    tags: vec!["breakfast".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(Ingredient::find().count(&f.db).await.unwrap(), 3);
        assert_eq!(Tag::find().count(&f.db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let f = setup().await;

        let cases = [
            NewRecipe { title: "  ".into(), ..Default::default() },
            NewRecipe { title: "x".into(), servings: Some(0), ..Default::default() },
            NewRecipe { title: "x".into(), prep_time: Some(-1), ..Default::default() },
            NewRecipe { title: "x".into(), steps: vec![" ".into()], ..Default::default() },
            NewRecipe {
                title: "x".into(),
                ingredients: vec![line("salt", None, "1"), line(" salt", None, "2")],
                ..Default::default()
            },
        ];
        for input in cases {
            let result = f.service.create(f.cook.user_id, input).await;
            assert!(matches!(result, Err(RecipesServiceError::InvalidInput(_))));
        }

        assert_eq!(Recipe::find().count(&f.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_for_unknown_author_rolls_back() {
        let f = setup().await;

        let result = f.service.create(UserId::new(), pancakes()).await;
        assert!(matches!(result, Err(RecipesServiceError::InvalidInput(_))));

        assert_eq!(Recipe::find().count(&f.db).await.unwrap(), 0);
        assert_eq!(Ingredient::find().count(&f.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_private_recipes_hidden_from_others() {
        let f = setup().await;
        let other = test_utils::create_test_user(&f.db, "other").await;
        let secret = f
            .service
            .create(
                f.cook.user_id,
                NewRecipe {
                    title: "Secret sauce".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!secret.is_public);

        assert!(f.service.get(Some(f.cook.user_id), secret.recipe_id).await.is_ok());
        let hidden = f.service.get(Some(other.user_id), secret.recipe_id).await;
        assert!(matches!(hidden, Err(RecipesServiceError::RecipeNotFound)));
        let anonymous = f.service.detail(None, secret.recipe_id).await;
        assert!(matches!(anonymous, Err(RecipesServiceError::RecipeNotFound)));

        f.service.set_visibility(f.cook.user_id, secret.recipe_id, true).await.unwrap();
        assert!(f.service.get(None, secret.recipe_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_is_partial_and_owner_only() {
        let f = setup().await;
        let other = test_utils::create_test_user(&f.db, "other").await;
        let recipe = f.service.create(f.cook.user_id, pancakes()).await.unwrap();

        let updated = f
            .service
            .update(
                f.cook.user_id,
                recipe.recipe_id,
                RecipeChanges {
                    title: Some("Buttermilk pancakes".into()),
                    description: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Buttermilk pancakes");
        assert_eq!(updated.description, None);
        assert_eq!(updated.servings, Some(4));
        assert!(updated.updated_at >= recipe.updated_at);

        let denied = f
            .service
            .update(other.user_id, recipe.recipe_id, RecipeChanges::default())
            .await;
        assert!(matches!(denied, Err(RecipesServiceError::NotRecipeOwner)));

        let invalid = f
            .service
            .update(
                f.cook.user_id,
                recipe.recipe_id,
                RecipeChanges {
                    servings: Some(Some(-2)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(invalid, Err(RecipesServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let f = setup().await;
        let other = test_utils::create_test_user(&f.db, "other").await;
        let recipe = f.service.create(f.cook.user_id, pancakes()).await.unwrap();

        let denied = f.service.delete(other.user_id, recipe.recipe_id).await;
        assert!(matches!(denied, Err(RecipesServiceError::NotRecipeOwner)));

        f.service.delete(f.cook.user_id, recipe.recipe_id).await.unwrap();

        assert_eq!(Step::find().count(&f.db).await.unwrap(), 0);
        assert_eq!(RecipeIngredient::find().count(&f.db).await.unwrap(), 0);
        assert_eq!(RecipeTag::find().count(&f.db).await.unwrap(), 0);
        // Shared rows survive.
        assert_eq!(Ingredient::find().count(&f.db).await.unwrap(), 3);
        assert_eq!(Tag::find().count(&f.db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_listing_and_search() {
        let f = setup().await;
        let other = test_utils::create_test_user(&f.db, "other").await;
        for (title, public) in [("Lemon tart", true), ("Apple pie", true), ("Lemon curd", false)] {
            test_utils::create_test_recipe(&f.db, f.cook.user_id, title, public).await;
        }
        test_utils::create_test_recipe(&f.db, other.user_id, "Lemonade", true).await;

        assert_eq!(f.service.count_public().await.unwrap(), 3);
        assert_eq!(f.service.list_public(0, 2).await.unwrap().len(), 2);
        assert_eq!(f.service.list_public(1, 2).await.unwrap().len(), 1);

        let titles: Vec<String> = f
            .service
            .search_public("LEMON", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Lemon tart", "Lemonade"]);

        assert_eq!(f.service.list_by_author(None, f.cook.user_id).await.unwrap().len(), 2);
        assert_eq!(
            f.service
                .list_by_author(Some(f.cook.user_id), f.cook.user_id)
                .await
                .unwrap()
                .len(),
            3
        );

        let counts = f.service.counts_by_author(10).await.unwrap();
        assert_eq!(counts, vec![(f.cook.user_id, 2), (other.user_id, 1)]);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let f = setup().await;
        for title in ["100% rye bread", "Brown_butter cookies", "Pea soup"] {
            test_utils::create_test_recipe(&f.db, f.cook.user_id, title, true).await;
        }

        let titles = |recipes: Vec<RecipeModel>| recipes.into_iter().map(|r| r.title).collect::<Vec<_>>();

        assert_eq!(titles(f.service.search_public("%", 10).await.unwrap()), vec!["100% rye bread"]);
        assert_eq!(
            titles(f.service.search_public("_", 10).await.unwrap()),
            vec!["Brown_butter cookies"]
        );
        assert!(f.service.search_public("p_a", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_steps_stay_contiguous() {
        let f = setup().await;
        let recipe = f.service.create(f.cook.user_id, pancakes()).await.unwrap();
        let owner = f.cook.user_id;

        f.service.add_step(owner, recipe.recipe_id, "Serve", None).await.unwrap();
        let preheat = f
            .service
            .add_step(owner, recipe.recipe_id, "Preheat pan", Some(1))
            .await
            .unwrap();
        assert_eq!(preheat.step_number, 1);

        let steps = f.service.steps(None, recipe.recipe_id).await.unwrap();
        assert_eq!(
            step_texts(&steps),
            vec![
                (1, "Preheat pan".into()),
                (2, "Whisk".into()),
                (3, "Rest".into()),
                (4, "Fry".into()),
                (5, "Serve".into()),
            ]
        );

        let rest = steps[2].step_id;
        f.service.remove_step(owner, rest).await.unwrap();
        f.service.update_step(owner, steps[0].step_id, "Heat pan").await.unwrap();

        let steps = f.service.steps(None, recipe.recipe_id).await.unwrap();
        assert_eq!(
            step_texts(&steps),
            vec![
                (1, "Heat pan".into()),
                (2, "Whisk".into()),
                (3, "Fry".into()),
                (4, "Serve".into()),
            ]
        );

        let far = f
            .service
            .add_step(owner, recipe.recipe_id, "Wash up", Some(99))
            .await
            .unwrap();
        assert_eq!(far.step_number, 5);

        let bad = f.service.add_step(owner, recipe.recipe_id, "x", Some(0)).await;
        assert!(matches!(bad, Err(RecipesServiceError::InvalidInput(_))));

        let missing = f.service.remove_step(owner, StepId::new()).await;
        assert!(matches!(missing, Err(RecipesServiceError::StepNotFound)));
    }

    #[tokio::test]
    async fn test_duplicate_step_number_rejected() {
        let f = setup().await;
        let recipe = test_utils::create_test_recipe(&f.db, f.cook.user_id, "Tea", true).await;
        let step = |text: &str| StepActiveModel {
            recipe_id: Set(recipe.recipe_id),
            step_number: Set(1),
            instruction: Set(text.into()),
            ..Default::default()
        };

        step("Boil").insert(&f.db).await.unwrap();
        let err = step("Steep").insert(&f.db).await.unwrap_err();
        assert!(QueryError::from(err).is_unique_violation());
    }

    #[tokio::test]
    async fn test_set_and_remove_ingredient() {
        let f = setup().await;
        let recipe = f.service.create(f.cook.user_id, pancakes()).await.unwrap();
        let owner = f.cook.user_id;

        let sugar = f
            .service
            .set_ingredient(owner, recipe.recipe_id, line("sugar", Some("g"), "30"))
            .await
            .unwrap();
        let sugar_again = f
            .service
            .set_ingredient(owner, recipe.recipe_id, line("sugar", Some("g"), "50"))
            .await
            .unwrap();
        assert_eq!(sugar.ingredient.ingredient_id, sugar_again.ingredient.ingredient_id);
        assert_eq!(sugar_again.quantity.as_deref(), Some("50"));

        let detail = f.service.detail(None, recipe.recipe_id).await.unwrap();
        assert_eq!(detail.ingredients.len(), 4);

        f.service
            .remove_ingredient(owner, recipe.recipe_id, sugar.ingredient.ingredient_id)
            .await
            .unwrap();
        let again = f
            .service
            .remove_ingredient(owner, recipe.recipe_id, sugar.ingredient.ingredient_id)
            .await;
        assert!(matches!(again, Err(RecipesServiceError::IngredientNotInRecipe)));
    }
}
