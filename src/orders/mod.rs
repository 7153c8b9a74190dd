use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
#[cfg(test)]
mod memory;

pub use repo::{OrderRepository, PgOrderRepository};
pub use services::OrderService;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::order_routes())
        .merge(handlers::review_routes())
}
