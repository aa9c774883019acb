//! Tenant service routes

use crate::client::ApicClient;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use portgroup_common::Error;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        error!(status = status.as_u16(), "Tenant request failed: {}", self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(client: Arc<ApicClient>) -> Router {
    Router::new()
        .route("/", get(banner_handler))
        .route("/getTenant.json", get(tenants_handler))
        .with_state(client)
        .layer(TraceLayer::new_for_http())
}

/// Health checks match on this exact text.
async fn banner_handler() -> &'static str {
    "Cisco HelloACI PlugIn Version 1.0."
}

async fn tenants_handler(State(client): State<Arc<ApicClient>>) -> Result<Response, ApiError> {
    let tenants = client.lookup_by_class("fvTenant").await.map_err(ApiError)?;
    info!(count = tenants.total_count, "Republishing tenants");
    Ok(Json(json!({
        "totalCount": tenants.total_count.to_string(),
        "imdata": tenants.imdata,
    }))
    .into_response())
}
