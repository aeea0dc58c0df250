//! Axum router and HTTP request handlers.
//!
//! Routes:
//! - `POST /orders`  - Publish an order on the configured channel
//! - `GET  /inventory` - Service greeting
//! - `GET  /healthz` - Health check
//! - `GET  /metrics` - Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/orders", post(handle_place_order))
        .route("/inventory", get(handle_inventory))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OrderAccepted {
    message: &'static str,
    identifier: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /orders`
///
/// Wraps the JSON body in an envelope and publishes it.  Answers as soon as
/// the broker has accepted the message; processing happens later, on
/// whichever subscriber wins the message lock.
#[instrument(skip(state, order))]
async fn handle_place_order(
    State(state): State<Arc<AppState>>,
    Json(order): Json<Value>,
) -> Result<Response, AppError> {
    if !order.is_object() {
        return Err(AppError::BadRequest(
            "order payload must be a JSON object".to_string(),
        ));
    }

    let channel = &state.config.dispatch.channel;
    let envelope = state.producer.publish_payload(channel, order).await?;
    info!(identifier = %envelope.identifier(), %channel, "order placed");

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderAccepted {
            message: "Order placed successfully",
            identifier: envelope.identifier().to_string(),
        }),
    )
        .into_response())
}

/// `GET /inventory`
async fn handle_inventory() -> &'static str {
    "Hello inventory Service"
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    crate::health::health_response(&state.store, &state.node_id).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by this instance.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state.metrics.encode()?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The request body was not an acceptable order.
    BadRequest(String),
    /// An unexpected internal error, e.g. the store rejected the publish.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::coordination::memory::MemoryStore;
    use crate::coordination::{CoordinationStore, Delivery};
    use crate::envelope::Envelope;
    use crate::metrics::MetricsRegistry;
    use crate::producer::Producer;

    fn state(store: &MemoryStore) -> Arc<AppState> {
        let config: Config = serde_yaml::from_str("keydb:\n  endpoint: memory://\n").unwrap();
        let store: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let metrics = MetricsRegistry::new();
        Arc::new(AppState {
            config: Arc::new(config),
            producer: Producer::new(Arc::clone(&store), Arc::clone(&metrics.metrics)),
            store,
            metrics,
            node_id: "order-test-0000".to_string(),
        })
    }

    #[tokio::test]
    async fn place_order_publishes_envelope() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("order_updates").await.unwrap();

        let response = handle_place_order(
            State(state(&store)),
            Json(json!({"item": "sku-42", "qty": 1})),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let Some(Delivery::Message(msg)) = sub.next().await else {
            panic!("expected a published order");
        };
        let envelope = Envelope::decode(&msg.payload).unwrap();
        assert_eq!(envelope.payload().get("item"), Some(&json!("sku-42")));
    }

    #[tokio::test]
    async fn place_order_rejects_non_object_body() {
        let store = MemoryStore::new();
        let err = handle_place_order(State(state(&store)), Json(json!([1, 2, 3])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inventory_route_greets() {
        assert_eq!(handle_inventory().await, "Hello inventory Service");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_registry() {
        let store = MemoryStore::new();
        let response = handle_metrics(State(state(&store))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
