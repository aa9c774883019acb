//! HTTP facade
//!
//! JSON routes used by the web UI, plus the UI's static assets.

use crate::reconfig::TaskResult;
use crate::service::InventoryService;
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use portgroup_common::{Credentials, Error};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: InventoryService,
    pub static_dir: Option<PathBuf>,
}

/// Error rendered as `{"error": ..}` with the mapped status
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        log_failure(status, &self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn status_of(e: &Error) -> StatusCode {
    StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn log_failure(status: StatusCode, e: &Error) {
    if status.is_server_error() {
        error!(status = status.as_u16(), "Request failed: {}", e);
    } else {
        warn!(status = status.as_u16(), "Request rejected: {}", e);
    }
}

pub fn router(state: AppState) -> Router {
    let static_dir = state.static_dir.clone();

    let router = Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/hosts.json", get(hosts_handler))
        .route("/vms.json", get(vms_handler))
        .route("/portgroups.json", get(portgroups_handler))
        .route("/vm.json", get(reassign_handler))
        .route("/reg.json", get(register_query_handler).post(register_form_handler))
        .route("/config.json", get(config_handler))
        .route("/status.json", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(not_found_handler),
    };

    router.layer(TraceLayer::new_for_http())
}

// ── Handlers ────────────────────────────────────────────────────────

async fn index_handler(State(state): State<AppState>) -> Response {
    if !state.service.is_registered() {
        return Redirect::to("/reg.html").into_response();
    }
    let Some(dir) = state.static_dir.as_ref() else {
        return not_found_handler().await.into_response();
    };
    match tokio::fs::read_to_string(dir.join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => ApiError(Error::Io(e)).into_response(),
    }
}

async fn hosts_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let hosts = state.service.hosts().await?;
    Ok(Json(hosts).into_response())
}

async fn vms_handler(State(state): State<AppState>) -> Response {
    match state.service.vms().await {
        Ok(vms) => Json(vms).into_response(),
        Err(e) => {
            let status = status_of(&e);
            log_failure(status, &e);
            (status, Json(json!({}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PortGroupsQuery {
    host: Option<String>,
}

async fn portgroups_handler(
    State(state): State<AppState>,
    Query(query): Query<PortGroupsQuery>,
) -> Result<Response, ApiError> {
    let host = query.host.unwrap_or_default();
    let nets = state.service.portgroups(&host).await?;
    Ok(Json(nets).into_response())
}

#[derive(Debug, Deserialize)]
struct ReassignQuery {
    uuid: Option<String>,
    portgroup: Option<String>,
}

async fn reassign_handler(
    State(state): State<AppState>,
    Query(query): Query<ReassignQuery>,
) -> Result<Response, ApiError> {
    let uuid = query.uuid.unwrap_or_default();
    let portgroup = query.portgroup.unwrap_or_default();
    let result = state.service.reassign_nic(&uuid, &portgroup).await?;
    Ok(task_response(result))
}

fn task_response(result: TaskResult) -> Response {
    if result.is_success() {
        let body = json!({ "status": "OK", "message": "OK", "task": result.task });
        (StatusCode::OK, Json(body)).into_response()
    } else {
        let body = json!({ "status": "Error", "message": result.message, "task": result.task });
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistrationForm {
    vcenter: String,
    username: String,
    password: String,
}

impl RegistrationForm {
    /// Fields set in `body` take precedence
    fn merge(self, body: RegistrationForm) -> Self {
        fn pick(query: String, body: String) -> String {
            if body.is_empty() {
                query
            } else {
                body
            }
        }
        Self {
            vcenter: pick(self.vcenter, body.vcenter),
            username: pick(self.username, body.username),
            password: pick(self.password, body.password),
        }
    }
}

async fn register_query_handler(
    State(state): State<AppState>,
    query: Result<Query<RegistrationForm>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(form)) => register(&state, form).await,
        Err(rejection) => registration_error(rejection.status(), rejection.body_text()),
    }
}

/// Fields may come from the query string, the urlencoded body, or both
async fn register_form_handler(
    State(state): State<AppState>,
    query: Result<Query<RegistrationForm>, QueryRejection>,
    body: Result<Form<RegistrationForm>, FormRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return registration_error(rejection.status(), rejection.body_text()),
    };
    let form = match body {
        Ok(Form(body)) => query.merge(body),
        Err(FormRejection::InvalidFormContentType(_)) => query,
        Err(rejection) => return registration_error(rejection.status(), rejection.body_text()),
    };
    register(&state, form).await
}

async fn register(state: &AppState, form: RegistrationForm) -> Response {
    let credentials = Credentials::new(form.vcenter, form.username, form.password);
    match state.service.register(credentials).await {
        Ok(()) => Json(json!({ "status": "OK" })).into_response(),
        Err(e) => {
            let status = status_of(&e);
            log_failure(status, &e);
            registration_error(status, e.to_string())
        }
    }
}

fn registration_error(status: StatusCode, message: String) -> Response {
    let body = json!({ "status": "Error", "message": message });
    (status, Json(body)).into_response()
}

async fn config_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let account = state.service.account()?;
    Ok(Json(account).into_response())
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status().await)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "portgroup-daemon",
        "version": portgroup_common::VERSION,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
