use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Aggregate status, derived from the line items on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Served,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Done,
}

/// Order row as stored, without its children.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub table_no: i32,
    pub notes: String,
    pub created_at: OffsetDateTime,
}

/// Fully hydrated order aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub table_no: i32,
    pub notes: String,
    pub created_at: OffsetDateTime,
    pub meals: Vec<OrderMeal>,
    pub review: Option<Review>,
}

impl Order {
    pub fn from_parts(row: OrderRow, meals: Vec<OrderMeal>, review: Option<Review>) -> Self {
        Self {
            id: row.id,
            table_no: row.table_no,
            notes: row.notes,
            created_at: row.created_at,
            meals,
            review,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.meals.iter().any(OrderMeal::is_pending)
    }

    pub fn status(&self) -> OrderStatus {
        if self.is_pending() {
            OrderStatus::Pending
        } else {
            OrderStatus::Served
        }
    }

    pub fn line_item(&self, meal_id: i64) -> Option<&OrderMeal> {
        self.meals.iter().find(|m| m.meal_id == meal_id)
    }
}

/// Line item keyed by (order_id, meal_id).
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderMeal {
    pub order_id: i64,
    pub meal_id: i64,
    pub meal_name: String,
    pub quantity: i32,
    pub completed: i32,
}

impl OrderMeal {
    pub fn is_pending(&self) -> bool {
        self.completed < self.quantity
    }

    pub fn status(&self) -> LineStatus {
        if self.is_pending() {
            LineStatus::Pending
        } else {
            LineStatus::Done
        }
    }

    /// The only progress transition: everything requested is served.
    pub fn complete(&mut self) {
        self.completed = self.quantity;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Review {
    pub id: i64,
    pub order_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
    pub photo_urls: Vec<String>,
    pub created_at: OffsetDateTime,
}

/// Input for creating an order. There is deliberately no `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub table_no: i32,
    pub notes: String,
    pub meals: Vec<NewOrderMeal>,
}

impl NewOrder {
    /// Folds repeated meals into one line item per meal, first-seen order.
    pub fn merged(mut self) -> AppResult<Self> {
        let mut merged: Vec<NewOrderMeal> = Vec::with_capacity(self.meals.len());
        for item in self.meals.drain(..) {
            match merged.iter_mut().find(|m| m.meal_id == item.meal_id) {
                Some(existing) => {
                    existing.quantity = add_quantity(item.meal_id, existing.quantity, item.quantity)?
                }
                None => merged.push(item),
            }
        }
        self.meals = merged;
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderMeal {
    pub meal_id: i64,
    pub quantity: i32,
}

/// Sum of two quantities for the same meal, rejecting overflow.
pub fn add_quantity(meal_id: i64, current: i32, extra: i32) -> AppResult<i32> {
    current
        .checked_add(extra)
        .ok_or_else(|| AppError::validation(format!("quantity for meal {meal_id} is too large")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub order_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
    pub photo_urls: Vec<String>,
}

/// What a customer submits; photos travel separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewInput {
    pub rating: i16,
    pub comment: Option<String>,
}

/// Trimmed comment, or `None` when nothing is left.
pub fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Cursor page over orders, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    /// Exclusive upper bound on `created_at`; `None` starts from the newest.
    pub older_than: Option<OffsetDateTime>,
    /// 0 selects [`DEFAULT_PAGE_SIZE`].
    pub page_size: u32,
    pub only_pending: bool,
}

impl OrderQuery {
    pub fn limit(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}
