// SeaORM entities for the recipe schema.
// Tables are created by the migrations in `models::migrator`.

pub mod collection;
pub mod collection_item;
pub mod ingredient;
pub mod recipe;
pub mod recipe_ingredient;
pub mod recipe_tag;
pub mod review;
pub mod step;
pub mod tag;
pub mod user;


pub mod prelude {
    pub use super::collection::{
        ActiveModel as CollectionActiveModel, Column as CollectionColumn, Entity as Collection,
        Model as CollectionModel,
    };
    pub use super::collection_item::{
        ActiveModel as CollectionItemActiveModel, Column as CollectionItemColumn,
        Entity as CollectionItem, Model as CollectionItemModel,
    };
    pub use super::ingredient::{
        ActiveModel as IngredientActiveModel, Column as IngredientColumn, Entity as Ingredient,
        Model as IngredientModel,
    };
    pub use super::recipe::{
        ActiveModel as RecipeActiveModel, Column as RecipeColumn, Entity as Recipe,
        Model as RecipeModel,
    };
    pub use super::recipe_ingredient::{
        ActiveModel as RecipeIngredientActiveModel, Column as RecipeIngredientColumn,
        Entity as RecipeIngredient, Model as RecipeIngredientModel,
    };
    pub use super::recipe_tag::{
        ActiveModel as RecipeTagActiveModel, Column as RecipeTagColumn, Entity as RecipeTag,
        Model as RecipeTagModel,
    };
    pub use super::review::{
        ActiveModel as ReviewActiveModel, Column as ReviewColumn, Entity as Review,
        Model as ReviewModel,
    };
    pub use super::step::{
        ActiveModel as StepActiveModel, Column as StepColumn, Entity as Step, Model as StepModel,
    };
    pub use super::tag::{
        ActiveModel as TagActiveModel, Column as TagColumn, Entity as Tag, Model as TagModel,
    };
    pub use super::user::{
        ActiveModel as UserActiveModel, Column as UserColumn, Entity as User, Model as UserModel,
        UserRole,
    };

    // Re-export commonly used SeaORM types and traits
    pub use sea_orm::{
        ActiveModelTrait,
        ActiveValue,

        ColumnTrait,
        Condition,
        ConnectionTrait,

        // Database and connection types
        Database,
        DatabaseConnection,
        DatabaseTransaction,
        DbConn,
        DbErr,

        // Core traits
        EntityTrait,
        IntoActiveModel,
        ModelTrait,
        NotSet,
        Order,
        PaginatorTrait,
        QueryFilter,
        QueryOrder,
        QuerySelect,
        Related,
        RelationTrait,

        // Active model helpers
        Set,
        TransactionTrait,
        Unchanged,
    };
}
