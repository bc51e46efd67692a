mod item;
mod rating;

pub use item::{CatalogItem, Recommendation};
pub use rating::{DuplicatePolicy, ItemId, Rating, RatingScale, UserId};
