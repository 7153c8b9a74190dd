//! Order workflow: every multi-step order mutation goes through here.
//!
//! Each mutation runs in one repository transaction and is broadcast to
//! live viewers only after that transaction has committed. Broadcasting is
//! best-effort; a failed publish is reported but the write stays.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::repo::OrderRepository;
use super::repo_types::{
    add_quantity, normalize_comment, NewOrder, NewOrderMeal, NewReview, Order, OrderQuery, ReviewInput,
    MAX_PAGE_SIZE,
};
use crate::{
    error::{AppError, AppResult},
    events::Broadcaster,
    images::{ImageResult, ImageStorage, UploadItem},
    meals::MealCatalog,
};

pub const MAX_REVIEW_PHOTOS: usize = 3;
const RATING_RANGE: std::ops::RangeInclusive<i16> = 1..=5;

pub struct OrderService<R> {
    orders: R,
    meals: Arc<dyn MealCatalog>,
    images: Arc<dyn ImageStorage>,
    hub: Broadcaster,
}

impl<R: OrderRepository> OrderService<R> {
    pub fn new(
        orders: R,
        meals: Arc<dyn MealCatalog>,
        images: Arc<dyn ImageStorage>,
        hub: Broadcaster,
    ) -> Self {
        Self {
            orders,
            meals,
            images,
            hub,
        }
    }

    pub async fn get_by_id(&self, order_id: i64) -> AppResult<Order> {
        self.orders.get_by_id(order_id).await
    }

    pub async fn get_orders(&self, mut query: OrderQuery) -> AppResult<Vec<Order>> {
        query.page_size = query.page_size.min(MAX_PAGE_SIZE);
        self.orders.get_orders(&query).await
    }

    /// The kitchen board: the newest `MAX_PAGE_SIZE` pending orders.
    ///
    /// Older pending orders are reached by paging with `get_orders` and
    /// `only_pending` (`GET /orders?onlyPending=true&olderThan=..`), using
    /// the last `created_at` of this page as the cursor.
    pub async fn get_all_pending_orders(&self) -> AppResult<Vec<Order>> {
        self.get_orders(OrderQuery {
            older_than: None,
            page_size: MAX_PAGE_SIZE,
            only_pending: true,
        })
        .await
    }

    #[instrument(skip(self, order), fields(table_no = order.table_no))]
    pub async fn create(&self, order: NewOrder) -> AppResult<Order> {
        let order = order.merged()?;
        let created = self
            .orders
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let order_id = tx.create(&order).await?;
                    tx.get_by_id(order_id).await
                })
            })
            .await?;

        info!(order_id = created.id, items = created.meals.len(), "order created");
        self.broadcast(&created).await?;
        Ok(created)
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn add_meals_to_order(
        &self,
        order_id: i64,
        items: Vec<NewOrderMeal>,
    ) -> AppResult<Order> {
        if items.is_empty() {
            return Err(AppError::validation("no meals attached"));
        }
        if let Some(bad) = items.iter().find(|i| i.quantity < 1) {
            return Err(AppError::validation(format!(
                "quantity for meal {} must be at least 1",
                bad.meal_id
            )));
        }
        for item in &items {
            self.meals.get_by_id(item.meal_id).await?;
        }

        let order = self
            .orders
            .with_transaction(move |tx| {
                Box::pin(async move {
                    tx.lock_order(order_id).await?;
                    for item in &items {
                        match tx.get_order_meal(order_id, item.meal_id).await? {
                            Some(mut existing) => {
                                existing.quantity =
                                    add_quantity(item.meal_id, existing.quantity, item.quantity)?;
                                tx.update_order_meal(&existing).await?;
                            }
                            None => tx.create_order_meal(order_id, item).await?,
                        }
                    }
                    tx.get_by_id(order_id).await
                })
            })
            .await?;

        info!(order_id, "meals added to order");
        self.broadcast(&order).await?;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn mark_completed(&self, order_id: i64, meal_id: i64) -> AppResult<Order> {
        let order = self
            .orders
            .with_transaction(move |tx| {
                Box::pin(async move {
                    tx.lock_order(order_id).await?;
                    let mut line = tx.get_order_meal(order_id, meal_id).await?.ok_or_else(|| {
                        AppError::not_found(format!(
                            "meal {meal_id} is not part of order {order_id}"
                        ))
                    })?;
                    line.complete();
                    tx.update_order_meal(&line).await?;
                    tx.get_by_id(order_id).await
                })
            })
            .await?;

        info!(order_id, meal_id, "order meal completed");
        self.broadcast(&order).await?;
        Ok(order)
    }

    /// Photos are uploaded before the review row is written and deleted
    /// again if anything after the first upload fails.
    #[instrument(skip(self, review, photos), fields(photos = photos.len()))]
    pub async fn create_review(
        &self,
        order_id: i64,
        review: ReviewInput,
        photos: Vec<UploadItem>,
    ) -> AppResult<Order> {
        if photos.len() > MAX_REVIEW_PHOTOS {
            return Err(AppError::validation(format!(
                "at most {MAX_REVIEW_PHOTOS} review photos are allowed"
            )));
        }
        if !RATING_RANGE.contains(&review.rating) {
            return Err(AppError::validation("rating must be between 1 and 5"));
        }

        let order = self.orders.get_by_id(order_id).await?;
        if order.review.is_some() {
            return Err(AppError::already_exists(format!(
                "order {order_id} already has a review"
            )));
        }

        let uploaded = self.upload_photos(photos).await?;
        let new_review = NewReview {
            order_id,
            rating: review.rating,
            comment: normalize_comment(review.comment),
            photo_urls: uploaded.iter().map(|p| p.url.clone()).collect(),
        };
        let created = match self.orders.create_review(&new_review).await {
            Ok(created) => created,
            Err(e) => {
                self.discard_photos(&uploaded).await;
                return Err(e);
            }
        };
        info!(order_id, rating = review.rating, "review created");

        // The review is committed; a failed re-read falls back to the
        // snapshot loaded above so viewers still hear about it.
        let order = match self.orders.get_by_id(order_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(order_id, error = %e, "re-read after review failed, broadcasting cached order");
                Order {
                    review: Some(created),
                    ..order
                }
            }
        };
        self.broadcast(&order).await?;
        Ok(order)
    }

    async fn upload_photos(&self, photos: Vec<UploadItem>) -> AppResult<Vec<ImageResult>> {
        let mut uploaded = Vec::with_capacity(photos.len());
        for photo in photos {
            match self.images.upload(photo).await {
                Ok(result) => uploaded.push(result),
                Err(e) => {
                    self.discard_photos(&uploaded).await;
                    return Err(AppError::Storage(e));
                }
            }
        }
        Ok(uploaded)
    }

    async fn discard_photos(&self, uploaded: &[ImageResult]) {
        for photo in uploaded {
            if let Err(e) = self.images.delete(&photo.public_id).await {
                warn!(public_id = %photo.public_id, error = %e, "failed to delete orphaned photo");
            }
        }
    }

    async fn broadcast(&self, order: &Order) -> AppResult<()> {
        self.hub.publish(order.clone()).await.map_err(|e| {
            error!(order_id = order.id, error = %e, "order committed but not broadcast");
            AppError::from(e)
        })
    }
}
