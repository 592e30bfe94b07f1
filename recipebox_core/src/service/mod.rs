pub mod collections;
pub mod ingredients;
pub mod password;
pub mod recipes;
pub mod reviews;
pub mod tags;
pub mod users;

pub use collections::{CollectionsService, CollectionsServiceError};
pub use ingredients::{IngredientsService, IngredientsServiceError};
pub use recipes::{
    IngredientLine, IngredientLineInput, NewRecipe, RecipeChanges, RecipeDetail, RecipesService,
    RecipesServiceError,
};
pub use reviews::{RatingSummary, RecipeRating, ReviewsService, ReviewsServiceError};
pub use tags::{TagsService, TagsServiceError};
pub use users::{UsersService, UsersServiceError};
