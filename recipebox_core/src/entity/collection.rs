use crate::ids::{CollectionId, UserId};
use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "collection")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub collection_id: CollectionId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: DateTimeUtc,
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
    #[sea_orm(has_many = "super::collection_item::Entity")]
    CollectionItem,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::collection_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CollectionItem.def()
    }
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        super::collection_item::Relation::Recipe.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::collection_item::Relation::Collection.def().rev())
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert {
            if self.collection_id.is_not_set() {
                self.collection_id = Set(CollectionId::new());
            }
            if self.created_at.is_not_set() {
                self.created_at = Set(chrono::Utc::now());
            }
        }
        Ok(self)
    }
}
