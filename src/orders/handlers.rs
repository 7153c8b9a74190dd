use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{CreateOrderRequest, OrderResponse, OrdersQuery},
    repo_types::{NewOrderMeal, ReviewInput},
    services::MAX_REVIEW_PHOTOS,
};
use crate::{
    error::{AppError, AppResult},
    images::UploadItem,
    state::AppState,
};

const REVIEW_BODY_LIMIT: usize = 20 * 1024 * 1024; // 20MB

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/pending", get(pending_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/meals", post(add_meals))
        .route("/orders/:id/meals/:meal_id/complete", put(complete_meal))
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/:id/review", post(create_review))
        .layer(DefaultBodyLimit::max(REVIEW_BODY_LIMIT))
}

/// GET /orders?olderThan=..&pageSize=..&onlyPending=..
#[instrument(skip(state))]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(q): Query<OrdersQuery>,
) -> AppResult<Json<Vec<OrderResponse>>> {
    let orders = state.orders.get_orders(q.into()).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/pending
#[instrument(skip(state))]
pub async fn pending_orders(State(state): State<AppState>) -> AppResult<Json<Vec<OrderResponse>>> {
    let orders = state.orders.get_all_pending_orders().await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<OrderResponse>> {
    let order = state.orders.get_by_id(id).await?;
    Ok(Json(order.into()))
}

#[instrument(skip(state, payload))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<OrderResponse>)> {
    let order = state.orders.create(payload.into_new_order()).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// POST /orders/:id/meals  [{ mealId, quantity }, ...]
#[instrument(skip(state, items))]
pub async fn add_meals(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(items): Json<Vec<NewOrderMeal>>,
) -> AppResult<Json<OrderResponse>> {
    let order = state.orders.add_meals_to_order(id, items).await?;
    Ok(Json(order.into()))
}

#[instrument(skip(state))]
pub async fn complete_meal(
    State(state): State<AppState>,
    Path((id, meal_id)): Path<(i64, i64)>,
) -> AppResult<Json<OrderResponse>> {
    let order = state.orders.mark_completed(id, meal_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/review (multipart)
/// Fields: rating (required), comment, photos[] (up to three files)
#[instrument(skip(state, mp))]
pub async fn create_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<OrderResponse>)> {
    let (review, photos) = read_review_form(mp).await?;
    info!(order_id = id, photos = photos.len(), "review submitted");
    let order = state.orders.create_review(id, review, photos).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

async fn read_review_form(mut mp: Multipart) -> AppResult<(ReviewInput, Vec<UploadItem>)> {
    let mut rating = None;
    let mut comment = None;
    let mut photos = Vec::new();

    while let Some(field) = mp.next_field().await.map_err(bad_form)? {
        match field.name() {
            Some("rating") => {
                let text = field.text().await.map_err(bad_form)?;
                let value = text
                    .trim()
                    .parse::<i16>()
                    .map_err(|_| AppError::validation("rating must be a number"))?;
                rating = Some(value);
            }
            Some("comment") => comment = Some(field.text().await.map_err(bad_form)?),
            Some("photos") | Some("photos[]") => {
                if photos.len() == MAX_REVIEW_PHOTOS {
                    return Err(AppError::validation(format!(
                        "at most {MAX_REVIEW_PHOTOS} review photos are allowed"
                    )));
                }
                let file_name = field.file_name().map(str::to_string);
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(bad_form)?;
                photos.push(UploadItem {
                    file_name,
                    content_type,
                    body,
                });
            }
            other => warn!(field = ?other, "ignoring unknown review field"),
        }
    }

    let rating = rating.ok_or_else(|| AppError::validation("rating is required"))?;
    Ok((ReviewInput { rating, comment }, photos))
}

fn bad_form(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::validation(format!("malformed review form: {e}"))
}
