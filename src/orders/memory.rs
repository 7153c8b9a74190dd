//! In-memory [`OrderRepository`] for service tests.
//!
//! A transaction works on a copy of the tables and writes it back only when
//! the callback returns `Ok`, mirroring commit/rollback. The table mutex is
//! held for the whole transaction, which also serialises writers.

use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use time::{macros::datetime, Duration, OffsetDateTime};
use tokio::sync::Mutex;

use super::repo::{OrderRepository, OrderTx, TxFuture};
use super::repo_types::{
    NewOrder, NewOrderMeal, NewReview, Order, OrderMeal, OrderQuery, OrderRow, Review,
};
use crate::error::{AppError, AppResult};

const EPOCH: OffsetDateTime = datetime!(2026-01-01 09:00 UTC);

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: BTreeMap<i64, OrderRow>,
    /// (order_id, meal_id) -> (quantity, completed)
    order_meals: BTreeMap<(i64, i64), (i32, i32)>,
    reviews: BTreeMap<i64, Review>,
    next_order_id: i64,
    next_review_id: i64,
}

#[derive(Clone)]
pub struct MemoryOrderRepository {
    tables: Arc<Mutex<Tables>>,
    meal_names: Arc<BTreeMap<i64, String>>,
}

impl MemoryOrderRepository {
    pub fn new(meals: &[(i64, &str)]) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            meal_names: Arc::new(meals.iter().map(|(id, n)| (*id, n.to_string())).collect()),
        }
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }
}

pub struct MemoryTx {
    tables: Tables,
    meal_names: Arc<BTreeMap<i64, String>>,
}

impl Tables {
    fn hydrate(&self, meal_names: &BTreeMap<i64, String>, row: &OrderRow) -> Order {
        let meals = self
            .order_meals
            .range((row.id, i64::MIN)..=(row.id, i64::MAX))
            .map(|(&(order_id, meal_id), &(quantity, completed))| OrderMeal {
                order_id,
                meal_id,
                meal_name: meal_names.get(&meal_id).cloned().unwrap_or_default(),
                quantity,
                completed,
            })
            .collect();
        Order::from_parts(row.clone(), meals, self.reviews.get(&row.id).cloned())
    }

    fn get(&self, meal_names: &BTreeMap<i64, String>, order_id: i64) -> AppResult<Order> {
        self.orders
            .get(&order_id)
            .map(|row| self.hydrate(meal_names, row))
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))
    }

    fn insert_meal(
        &mut self,
        meal_names: &BTreeMap<i64, String>,
        order_id: i64,
        meal: &NewOrderMeal,
    ) -> AppResult<()> {
        if !self.orders.contains_key(&order_id) || !meal_names.contains_key(&meal.meal_id) {
            return Err(AppError::validation("referenced record does not exist"));
        }
        if meal.quantity < 1 {
            return Err(AppError::validation("value violates order_meals_quantity_check"));
        }
        if self.order_meals.contains_key(&(order_id, meal.meal_id)) {
            return Err(AppError::already_exists("duplicate value violates order_meals_pkey"));
        }
        self.order_meals
            .insert((order_id, meal.meal_id), (meal.quantity, 0));
        Ok(())
    }
}

#[async_trait]
impl OrderTx for MemoryTx {
    async fn lock_order(&mut self, order_id: i64) -> AppResult<()> {
        self.tables.get(&self.meal_names, order_id).map(|_| ())
    }

    async fn create(&mut self, order: &NewOrder) -> AppResult<i64> {
        if order.meals.is_empty() {
            return Err(AppError::validation("order must contain at least one meal"));
        }
        if order.table_no < 1 {
            return Err(AppError::validation("value violates orders_table_no_check"));
        }
        self.tables.next_order_id += 1;
        let id = self.tables.next_order_id;
        self.tables.orders.insert(
            id,
            OrderRow {
                id,
                table_no: order.table_no,
                notes: order.notes.clone(),
                created_at: EPOCH + Duration::minutes(id),
            },
        );
        for meal in &order.meals {
            self.tables.insert_meal(&self.meal_names, id, meal)?;
        }
        Ok(id)
    }

    async fn get_by_id(&mut self, order_id: i64) -> AppResult<Order> {
        self.tables.get(&self.meal_names, order_id)
    }

    async fn get_order_meal(
        &mut self,
        order_id: i64,
        meal_id: i64,
    ) -> AppResult<Option<OrderMeal>> {
        Ok(self
            .tables
            .order_meals
            .get(&(order_id, meal_id))
            .map(|&(quantity, completed)| OrderMeal {
                order_id,
                meal_id,
                meal_name: self.meal_names.get(&meal_id).cloned().unwrap_or_default(),
                quantity,
                completed,
            }))
    }

    async fn create_order_meal(&mut self, order_id: i64, meal: &NewOrderMeal) -> AppResult<()> {
        self.tables.insert_meal(&self.meal_names, order_id, meal)
    }

    async fn update_order_meal(&mut self, meal: &OrderMeal) -> AppResult<()> {
        if meal.quantity < 1 || meal.completed < 0 || meal.completed > meal.quantity {
            return Err(AppError::validation("value violates order_meals_completed_check"));
        }
        match self.tables.order_meals.get_mut(&(meal.order_id, meal.meal_id)) {
            Some(row) => {
                *row = (meal.quantity, meal.completed);
                Ok(())
            }
            None => Err(AppError::not_found("order meal not found")),
        }
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn with_transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn OrderTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let mut committed = self.tables.lock().await;
        let mut scope = MemoryTx {
            tables: committed.clone(),
            meal_names: Arc::clone(&self.meal_names),
        };
        let handle: &mut dyn OrderTx = &mut scope;
        match AssertUnwindSafe(f(handle)).catch_unwind().await {
            Ok(Ok(value)) => {
                *committed = scope.tables;
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn get_by_id(&self, order_id: i64) -> AppResult<Order> {
        self.tables.lock().await.get(&self.meal_names, order_id)
    }

    async fn get_orders(&self, query: &OrderQuery) -> AppResult<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&OrderRow> = tables
            .orders
            .values()
            .filter(|r| query.older_than.map_or(true, |t| r.created_at < t))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .map(|row| tables.hydrate(&self.meal_names, row))
            .filter(|o| !query.only_pending || o.is_pending())
            .take(query.limit() as usize)
            .collect())
    }

    async fn create_review(&self, review: &NewReview) -> AppResult<Review> {
        let mut tables = self.tables.lock().await;
        if !tables.orders.contains_key(&review.order_id) {
            return Err(AppError::validation("referenced record does not exist"));
        }
        if tables.reviews.contains_key(&review.order_id) {
            return Err(AppError::already_exists("duplicate value violates reviews_order_id_key"));
        }
        tables.next_review_id += 1;
        let row = Review {
            id: tables.next_review_id,
            order_id: review.order_id,
            rating: review.rating,
            comment: review.comment.clone(),
            photo_urls: review.photo_urls.clone(),
            created_at: EPOCH,
        };
        tables.reviews.insert(review.order_id, row.clone());
        Ok(row)
    }
}
