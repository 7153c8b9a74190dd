pub mod hub;
pub mod viewer;

pub use hub::{BroadcastError, Broadcaster, Hub, Subscription};

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    viewer::routes()
}
