//! Live viewer endpoint: relays one hub subscription to one SSE client.
//!
//! The subscription is owned by the response stream. When the client goes
//! away axum drops the stream, which drains the queue and unregisters the
//! viewer from the hub.

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{future, Stream, StreamExt};
use tracing::{info, instrument, warn};

use super::hub::{Broadcaster, OrderSnapshot};
use crate::{error::AppResult, orders::dto::OrderResponse, state::AppState};

const KEEP_ALIVE_SECS: u64 = 15;

pub fn routes() -> Router<AppState> {
    Router::new().route("/orders/events", get(order_events))
}

/// GET /orders/events
#[instrument(skip(hub))]
pub async fn order_events(
    State(hub): State<Broadcaster>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = hub.register().await?;
    info!(subscriber = %subscription.id(), "live viewer connected");

    let events = subscription.filter_map(|order| future::ready(order_event(&order).map(Ok)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

fn order_event(order: &OrderSnapshot) -> Option<Event> {
    match Event::default()
        .event("order")
        .json_data(OrderResponse::from(order.as_ref()))
    {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!(order_id = order.id, error = %e, "failed to encode order event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HubConfig,
        events::hub::Hub,
        orders::repo_types::{Order, OrderMeal},
    };
    use axum::{http::header::CONTENT_TYPE, response::IntoResponse};
    use time::macros::datetime;

    fn order() -> Order {
        Order {
            id: 42,
            table_no: 3,
            notes: "no onions".into(),
            created_at: datetime!(2026-03-01 18:30 UTC),
            meals: vec![OrderMeal {
                order_id: 42,
                meal_id: 7,
                meal_name: "Goulash".into(),
                quantity: 2,
                completed: 0,
            }],
            review: None,
        }
    }

    #[tokio::test]
    async fn streams_published_orders_as_sse() {
        let hub = Hub::spawn(&HubConfig::default());
        let resp = order_events(State(hub.clone())).await.into_response();
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(hub.subscriber_count().await.unwrap(), 1);

        hub.publish(order()).await.unwrap();

        let mut body = resp.into_body().into_data_stream();
        let frame = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("event: order\n"));
        assert!(text.contains("\"mealName\":\"Goulash\""));
        assert!(text.contains("\"tableNo\":3"));
    }

    #[tokio::test]
    async fn disconnect_unregisters_viewer() {
        let hub = Hub::spawn(&HubConfig::default());
        let resp = order_events(State(hub.clone())).await.into_response();
        assert_eq!(hub.subscriber_count().await.unwrap(), 1);

        drop(resp);
        assert_eq!(hub.subscriber_count().await.unwrap(), 0);
    }
}
