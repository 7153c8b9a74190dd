//! Order aggregate storage.
//!
//! Multi-step writes go through [`OrderRepository::with_transaction`], which
//! hands the callback a transaction-scoped [`OrderTx`] and commits only if
//! the callback returns `Ok`. Errors and panics roll back.

use std::{collections::HashMap, panic::AssertUnwindSafe};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::repo_types::{
    NewOrder, NewOrderMeal, NewReview, Order, OrderMeal, OrderQuery, OrderRow, Review,
};
use crate::error::{AppError, AppResult};

pub type TxFuture<'t, T> = BoxFuture<'t, AppResult<T>>;

/// Operations available inside one transaction.
#[async_trait]
pub trait OrderTx: Send {
    /// Row-locks the order for the rest of the transaction.
    async fn lock_order(&mut self, order_id: i64) -> AppResult<()>;
    async fn create(&mut self, order: &NewOrder) -> AppResult<i64>;
    async fn get_by_id(&mut self, order_id: i64) -> AppResult<Order>;
    async fn get_order_meal(&mut self, order_id: i64, meal_id: i64)
        -> AppResult<Option<OrderMeal>>;
    async fn create_order_meal(&mut self, order_id: i64, meal: &NewOrderMeal) -> AppResult<()>;
    /// Fails with NotFound when no row matches.
    async fn update_order_meal(&mut self, meal: &OrderMeal) -> AppResult<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    async fn with_transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn OrderTx) -> TxFuture<'t, T> + Send + 'static;

    async fn get_by_id(&self, order_id: i64) -> AppResult<Order>;
    async fn get_orders(&self, query: &OrderQuery) -> AppResult<Vec<Order>>;
    async fn create_review(&self, review: &NewReview) -> AppResult<Review>;
}

#[derive(Clone)]
pub struct PgOrderRepository {
    db: PgPool,
}

impl PgOrderRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

pub struct PgOrderTx<'c> {
    tx: Transaction<'c, Postgres>,
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn with_transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn OrderTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let tx = self.db.begin().await?;
        let mut scope = PgOrderTx { tx };

        let handle: &mut dyn OrderTx = &mut scope;
        let outcome = AssertUnwindSafe(f(handle)).catch_unwind().await;
        match outcome {
            Ok(Ok(value)) => {
                scope.tx.commit().await?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(rb) = scope.tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                debug!(error = %e, "transaction rolled back");
                Err(e)
            }
            Err(panic) => {
                if let Err(rb) = scope.tx.rollback().await {
                    warn!(error = %rb, "rollback after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn get_by_id(&self, order_id: i64) -> AppResult<Order> {
        let mut conn = self.db.acquire().await?;
        fetch_order(&mut conn, order_id).await
    }

    async fn get_orders(&self, query: &OrderQuery) -> AppResult<Vec<Order>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT o.id, o.table_no, o.notes, o.created_at
              FROM orders o
             WHERE ($1::timestamptz IS NULL OR o.created_at < $1)
               AND (NOT $2 OR EXISTS (
                       SELECT 1
                         FROM order_meals om
                        WHERE om.order_id = o.id
                          AND om.completed < om.quantity))
             ORDER BY o.created_at DESC, o.id DESC
             LIMIT $3
            "#,
        )
        .bind(query.older_than)
        .bind(query.only_pending)
        .bind(i64::from(query.limit()))
        .fetch_all(&mut *conn)
        .await?;

        hydrate(&mut conn, rows).await
    }

    async fn create_review(&self, review: &NewReview) -> AppResult<Review> {
        let row = sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (order_id, rating, comment, photo_urls)
            VALUES ($1, $2, $3, $4)
            RETURNING id, order_id, rating, comment, photo_urls, created_at
            "#,
        )
        .bind(review.order_id)
        .bind(review.rating)
        .bind(review.comment.as_deref())
        .bind(&review.photo_urls[..])
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl<'c> OrderTx for PgOrderTx<'c> {
    async fn lock_order(&mut self, order_id: i64) -> AppResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|_| ())
            .ok_or_else(|| order_not_found(order_id))
    }

    async fn create(&mut self, order: &NewOrder) -> AppResult<i64> {
        if order.meals.is_empty() {
            return Err(AppError::validation("order must contain at least one meal"));
        }

        // created_at comes from the column default, never from the caller.
        let order_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO orders (table_no, notes)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(order.table_no)
        .bind(&order.notes)
        .fetch_one(&mut *self.tx)
        .await?;

        for meal in &order.meals {
            self.create_order_meal(order_id, meal).await?;
        }
        Ok(order_id)
    }

    async fn get_by_id(&mut self, order_id: i64) -> AppResult<Order> {
        fetch_order(&mut *self.tx, order_id).await
    }

    async fn get_order_meal(
        &mut self,
        order_id: i64,
        meal_id: i64,
    ) -> AppResult<Option<OrderMeal>> {
        let row = sqlx::query_as::<_, OrderMeal>(
            r#"
            SELECT om.order_id, om.meal_id, m.name AS meal_name, om.quantity, om.completed
              FROM order_meals om
              JOIN meals m ON m.id = om.meal_id
             WHERE om.order_id = $1 AND om.meal_id = $2
            "#,
        )
        .bind(order_id)
        .bind(meal_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn create_order_meal(&mut self, order_id: i64, meal: &NewOrderMeal) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_meals (order_id, meal_id, quantity, completed)
            VALUES ($1, $2, $3, 0)
            "#,
        )
        .bind(order_id)
        .bind(meal.meal_id)
        .bind(meal.quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_meal(&mut self, meal: &OrderMeal) -> AppResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE order_meals
               SET quantity = $3, completed = $4
             WHERE order_id = $1 AND meal_id = $2
            "#,
        )
        .bind(meal.order_id)
        .bind(meal.meal_id)
        .bind(meal.quantity)
        .bind(meal.completed)
        .execute(&mut *self.tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "meal {} is not part of order {}",
                meal.meal_id, meal.order_id
            )));
        }
        Ok(())
    }
}

fn order_not_found(order_id: i64) -> AppError {
    AppError::not_found(format!("order {order_id} not found"))
}

async fn fetch_order(conn: &mut PgConnection, order_id: i64) -> AppResult<Order> {
    let row = sqlx::query_as::<_, OrderRow>(
        "SELECT id, table_no, notes, created_at FROM orders WHERE id = $1",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| order_not_found(order_id))?;

    let mut orders = hydrate(conn, vec![row]).await?;
    orders.pop().ok_or_else(|| order_not_found(order_id))
}

/// Loads line items and reviews for a page of orders in two queries.
async fn hydrate(conn: &mut PgConnection, rows: Vec<OrderRow>) -> AppResult<Vec<Order>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    let items = sqlx::query_as::<_, OrderMeal>(
        r#"
        SELECT om.order_id, om.meal_id, m.name AS meal_name, om.quantity, om.completed
          FROM order_meals om
          JOIN meals m ON m.id = om.meal_id
         WHERE om.order_id = ANY($1)
         ORDER BY om.order_id, om.meal_id
        "#,
    )
    .bind(&ids[..])
    .fetch_all(&mut *conn)
    .await?;

    let reviews = sqlx::query_as::<_, Review>(
        r#"
        SELECT id, order_id, rating, comment, photo_urls, created_at
          FROM reviews
         WHERE order_id = ANY($1)
        "#,
    )
    .bind(&ids[..])
    .fetch_all(&mut *conn)
    .await?;

    let mut items_by_order: HashMap<i64, Vec<OrderMeal>> = HashMap::new();
    for item in items {
        items_by_order.entry(item.order_id).or_default().push(item);
    }
    let mut review_by_order: HashMap<i64, Review> =
        reviews.into_iter().map(|r| (r.order_id, r)).collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let meals = items_by_order.remove(&row.id).unwrap_or_default();
            let review = review_by_order.remove(&row.id);
            Order::from_parts(row, meals, review)
        })
        .collect())
}
