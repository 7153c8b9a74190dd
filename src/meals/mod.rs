//! Meal catalog, read side only.

pub mod repo;

pub use repo::{Meal, MealCatalog, PgMealCatalog};
