use std::fmt;

use sea_orm::{DbErr, DeriveValueType, TryFromU64};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUIDv7 primary key newtype. Storage and loading come from
/// `DeriveValueType`; `TryFromU64` lets it serve as a primary key.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            DeriveValueType,
        )]
        #[serde(transparent)]
        #[sea_orm(column_type = "Uuid", array_type = "Uuid")]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl TryFromU64 for $name {
            fn try_from_u64(_: u64) -> Result<Self, DbErr> {
                Err(DbErr::ConvertFromU64(stringify!($name)))
            }
        }
    };
}

define_id!(UserId);
define_id!(RecipeId);
define_id!(IngredientId);
define_id!(StepId);
define_id!(TagId);
define_id!(CollectionId);
define_id!(ReviewId);

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{sea_query::ValueType, Value};

    #[test]
    fn ids_are_unique_and_time_ordered() {
        let first = RecipeId::new();
        let second = RecipeId::new();
        assert_ne!(first, second);
        assert!(first < second);
    }

    #[test]
    fn parses_its_own_display() {
        let id = TagId::new();
        let parsed: TagId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TagId>().is_err());
    }

    #[test]
    fn serializes_as_a_bare_uuid() {
        let uuid = Uuid::now_v7();
        let id = CollectionId::from(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
        let deserialized: CollectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn converts_to_and_from_sea_orm_values() {
        let id = ReviewId::new();
        let value: Value = id.into();
        assert_eq!(<ReviewId as ValueType>::try_from(value).unwrap(), id);
        assert!(<ReviewId as ValueType>::try_from(Value::Uuid(None)).is_err());
    }
}
