use crate::ids::TagId;
use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tag")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tag_id: TagId,
    #[sea_orm(unique)]
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recipe_tag::Entity")]
    RecipeTag,
}

impl Related<super::recipe_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeTag.def()
    }
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        super::recipe_tag::Relation::Recipe.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::recipe_tag::Relation::Tag.def().rev())
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert && self.tag_id.is_not_set() {
            self.tag_id = Set(TagId::new());
        }
        Ok(self)
    }
}
