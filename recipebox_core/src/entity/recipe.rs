use crate::ids::{RecipeId, UserId};
use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// A recipe authored by a user. Times are in minutes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipe")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub recipe_id: RecipeId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub prep_time: Option<i32>,
    pub cook_time: Option<i32>,
    pub servings: Option<i32>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::UserId",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(has_many = "super::step::Entity")]
    Step,
    #[sea_orm(has_many = "super::recipe_ingredient::Entity")]
    RecipeIngredient,
    #[sea_orm(has_many = "super::recipe_tag::Entity")]
    RecipeTag,
    #[sea_orm(has_many = "super::review::Entity")]
    Review,
    #[sea_orm(has_many = "super::collection_item::Entity")]
    CollectionItem,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Step.def()
    }
}

impl Related<super::recipe_ingredient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeIngredient.def()
    }
}

impl Related<super::recipe_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeTag.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Review.def()
    }
}

impl Related<super::collection_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectionItem.def()
    }
}

impl Related<super::ingredient::Entity> for Entity {
    fn to() -> RelationDef {
        super::recipe_ingredient::Relation::Ingredient.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::recipe_ingredient::Relation::Recipe.def().rev())
    }
}

impl Related<super::tag::Entity> for Entity {
    fn to() -> RelationDef {
        super::recipe_tag::Relation::Tag.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::recipe_tag::Relation::Recipe.def().rev())
    }
}

impl Related<super::collection::Entity> for Entity {
    fn to() -> RelationDef {
        super::collection_item::Relation::Collection.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::collection_item::Relation::Recipe.def().rev())
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();
        if insert {
            if self.recipe_id.is_not_set() {
                self.recipe_id = Set(RecipeId::new());
            }
            if self.is_public.is_not_set() {
                self.is_public = Set(false);
            }
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }
        Ok(self)
    }
}
