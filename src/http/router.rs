//! HTTP route table.

use std::time::Duration;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Build the application router with all middleware layers.
///
/// Every response carries an `x-request-id`, generated when the client did
/// not send one.
#[allow(deprecated)]
pub fn build_router(request_timeout: Duration) -> Router {
    let api = Router::new().route("/ping", get(ping));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
