use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Meal {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub image_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Read access to the meal catalog, used to validate line items.
#[async_trait]
pub trait MealCatalog: Send + Sync {
    async fn get_by_id(&self, meal_id: i64) -> AppResult<Meal>;
}

#[derive(Clone)]
pub struct PgMealCatalog {
    db: PgPool,
}

impl PgMealCatalog {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MealCatalog for PgMealCatalog {
    /// Find a meal by id.
    async fn get_by_id(&self, meal_id: i64) -> AppResult<Meal> {
        sqlx::query_as::<_, Meal>(
            r#"
            SELECT id, name, description, price_cents, image_url, created_at
              FROM meals
             WHERE id = $1
            "#,
        )
        .bind(meal_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("meal {meal_id} not found")))
    }
}
