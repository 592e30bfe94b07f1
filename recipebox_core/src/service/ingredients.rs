use sea_orm::{
    sea_query::{Expr, Func},
    DatabaseConnection,
};
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::IngredientId,
    query::{contains_pattern, crud, FindMany, GroupBy},
};

#[derive(Debug, Error)]
pub enum IngredientsServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("ingredient not found")]
    IngredientNotFound,

    #[error("ingredient name is empty")]
    InvalidName,

    #[error("ingredient is used by {0} recipe(s)")]
    IngredientInUse(u64),
}

impl From<DbErr> for IngredientsServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

fn clean_name(name: &str) -> Result<String, IngredientsServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IngredientsServiceError::InvalidName);
    }
    Ok(name.to_string())
}

fn clean_unit(unit: Option<&str>) -> Option<String> {
    unit.map(str::trim).filter(|u| !u.is_empty()).map(str::to_string)
}

pub(crate) fn clean_ingredient(
    name: &str,
    unit: Option<&str>,
) -> Option<(String, Option<String>)> {
    clean_name(name).ok().map(|name| (name, clean_unit(unit)))
}

fn unit_condition(unit: &Option<String>) -> Condition {
    match unit {
        Some(unit) => Condition::all().add(IngredientColumn::Unit.eq(unit.as_str())),
        None => Condition::all().add(IngredientColumn::Unit.is_null()),
    }
}

/// Looks up an ingredient by exact name and unit on any connection,
/// inserting it when missing. Inputs must already be cleaned.
pub(crate) async fn find_or_create_on<C: ConnectionTrait>(
    db: &C,
    name: String,
    unit: Option<String>,
) -> Result<IngredientModel, QueryError> {
    let ingredients = crud::<Ingredient, _>(db);
    let existing = ingredients
        .find_first(
            FindMany::new()
                .filter(IngredientColumn::Name.eq(name.as_str()))
                .filter(unit_condition(&unit))
                .order_by_asc(IngredientColumn::IngredientId),
        )
        .await?;

    match existing {
        Some(ingredient) => Ok(ingredient),
        None => {
            ingredients
                .create(IngredientActiveModel {
                    name: Set(name),
                    unit: Set(unit),
                    ..Default::default()
                })
                .await
        }
    }
}

#[derive(Clone)]
pub struct IngredientsService {
    db: DatabaseConnection,
}

impl IngredientsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        name: &str,
        unit: Option<&str>,
    ) -> Result<IngredientModel, IngredientsServiceError> {
        let ingredient = crud::<Ingredient, _>(&self.db)
            .create(IngredientActiveModel {
                name: Set(clean_name(name)?),
                unit: Set(clean_unit(unit)),
                ..Default::default()
            })
            .await?;

        tracing::debug!(ingredient_id = %ingredient.ingredient_id, name = %ingredient.name, "created ingredient");
        Ok(ingredient)
    }

    /// Returns the ingredient with exactly this name and unit, creating it if needed.
    pub async fn find_or_create(
        &self,
        name: &str,
        unit: Option<&str>,
    ) -> Result<IngredientModel, IngredientsServiceError> {
        let name = clean_name(name)?;
        Ok(find_or_create_on(&self.db, name, clean_unit(unit)).await?)
    }

    pub async fn get(
        &self,
        ingredient_id: IngredientId,
    ) -> Result<IngredientModel, IngredientsServiceError> {
        crud::<Ingredient, _>(&self.db)
            .find_by_id(ingredient_id)
            .await?
            .ok_or(IngredientsServiceError::IngredientNotFound)
    }

    /// Case-insensitive substring match on the name, alphabetical.
    pub async fn search(
        &self,
        fragment: &str,
        limit: u64,
    ) -> Result<Vec<IngredientModel>, IngredientsServiceError> {
        let pattern = contains_pattern(&fragment.trim().to_lowercase());
        Ok(crud::<Ingredient, _>(&self.db)
            .find_many(
                FindMany::new()
                    .filter(
                        Expr::expr(Func::lower(Expr::col((Ingredient, IngredientColumn::Name))))
                            .like(pattern),
                    )
                    .order_by_asc(IngredientColumn::Name)
                    .take(limit),
            )
            .await?)
    }

    /// `unit: Some(None)` clears the unit; `None` leaves it alone.
    pub async fn update(
        &self,
        ingredient_id: IngredientId,
        name: Option<&str>,
        unit: Option<Option<&str>>,
    ) -> Result<IngredientModel, IngredientsServiceError> {
        let mut changes = <IngredientActiveModel as Default>::default();
        if let Some(name) = name {
            changes.name = Set(clean_name(name)?);
        }
        if let Some(unit) = unit {
            changes.unit = Set(clean_unit(unit));
        }

        crud::<Ingredient, _>(&self.db)
            .update(
                Condition::all().add(IngredientColumn::IngredientId.eq(ingredient_id)),
                changes,
            )
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => IngredientsServiceError::IngredientNotFound,
                other => other.into(),
            })
    }

    /// Refused while any recipe still lists the ingredient.
    pub async fn delete(&self, ingredient_id: IngredientId) -> Result<(), IngredientsServiceError> {
        let uses = crud::<RecipeIngredient, _>(&self.db)
            .count(Condition::all().add(RecipeIngredientColumn::IngredientId.eq(ingredient_id)))
            .await?;
        if uses > 0 {
            return Err(IngredientsServiceError::IngredientInUse(uses));
        }

        crud::<Ingredient, _>(&self.db)
            .delete(Condition::all().add(IngredientColumn::IngredientId.eq(ingredient_id)))
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => IngredientsServiceError::IngredientNotFound,
                // A recipe picked it up after the usage check.
                QueryError::ForeignKeyViolation(_) => IngredientsServiceError::IngredientInUse(1),
                other => other.into(),
            })?;

        tracing::debug!(%ingredient_id, "deleted ingredient");
        Ok(())
    }

    /// How many recipes use each ingredient, most used first.
    pub async fn usage_counts(
        &self,
        limit: u64,
    ) -> Result<Vec<(IngredientId, u64)>, IngredientsServiceError> {
        let groups = crud::<RecipeIngredient, _>(&self.db)
            .group_by::<IngredientId>(
                GroupBy::new([RecipeIngredientColumn::IngredientId])
                    .order_by_count(Order::Desc)
                    .take(limit),
            )
            .await?;

        Ok(groups.into_iter().map(|g| (g.key, g.count())).collect())
    }
}
