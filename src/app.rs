use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::AppResult;
use crate::events::Broadcaster;
use crate::state::AppState;
use crate::{events, orders};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(orders::router())
                .merge(events::router())
                .route("/health", get(health)),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// GET /health: also proves the hub loop is alive.
async fn health(State(hub): State<Broadcaster>) -> AppResult<Json<Value>> {
    let viewers = hub.subscriber_count().await?;
    Ok(Json(json!({ "status": "ok", "viewers": viewers })))
}

pub async fn serve(app: Router, server: &ServerConfig) -> anyhow::Result<()> {
    let addr = server.addr()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::events::Hub;

    #[tokio::test]
    async fn health_reports_viewers() {
        let hub = Hub::spawn(&HubConfig::default());
        let _viewer = hub.register().await.unwrap();

        let Json(body) = health(State(hub)).await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["viewers"], 1);
    }
}
