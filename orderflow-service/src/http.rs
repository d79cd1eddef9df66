//! HTTP ingress.
//!
//! - `POST /api/orders` publishes the order in the request body.
//! - `GET /api/orders/generate` publishes a random valid order.
//!
//! Both answer with a plain-text acknowledgement. The order is not validated
//! here; the consumer decides its fate.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use orderflow::ingress::{OrderIngress, ORDER_SENT, RANDOM_ORDER_SENT};
use orderflow::Order;
use tracing::{info, instrument};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    ingress: OrderIngress,
}

/// Builds the ingress router.
pub fn router(ingress: OrderIngress) -> Router {
    Router::new()
        .route("/api/orders", post(submit_order))
        .route("/api/orders/generate", get(generate_order))
        .with_state(AppState { ingress })
}

#[instrument(skip_all)]
async fn submit_order(State(state): State<AppState>, Json(order): Json<Order>) -> &'static str {
    info!(order_id = %order.id, "received order");
    // Publish failures are logged by the ingress.
    let _ = state.ingress.submit(order).await;
    ORDER_SENT
}

#[instrument(skip_all)]
async fn generate_order(State(state): State<AppState>) -> &'static str {
    if let Ok(order) = state.ingress.generate().await {
        info!(order_id = %order.id, "generated random order");
    }
    RANDOM_ORDER_SENT
}
