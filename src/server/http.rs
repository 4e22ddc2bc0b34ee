//! HTTP API for the VPN control plane.
//!
//! Everything under `/api/v1` requires the API key; `/health` does not.
//! Responses use one envelope: `{"status":"ok", ...}` on success and
//! `{"status":"error","category":..,"message":..}` on failure.

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use super::auth::{ApiKey, require_api_key};
use crate::admin::{AdminError, LifecycleOrchestrator};
use crate::config::Config;
use crate::security::InvalidInput;

pub struct AppState {
    pub admin: Arc<LifecycleOrchestrator>,
    pub(super) api_key: Option<ApiKey>,
}

impl AppState {
    pub fn new(admin: Arc<LifecycleOrchestrator>, api_key: Option<&str>) -> Self {
        Self {
            admin,
            api_key: api_key.map(ApiKey::new),
        }
    }
}

pub struct Server {
    config: Config,
    admin: Arc<LifecycleOrchestrator>,
}

impl Server {
    /// Refuses to build without an API key unless
    /// `server.allow_unauthenticated` is set.
    pub fn new(config: &Config, admin: Arc<LifecycleOrchestrator>) -> Result<Self> {
        let has_key = config
            .server
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key && !config.server.allow_unauthenticated {
            anyhow::bail!(
                "server.api_key is not set; configure one or set server.allow_unauthenticated = true"
            );
        }
        Ok(Self {
            config: config.clone(),
            admin,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let api_key = self
            .config
            .server
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("API key authentication is disabled");
        }
        let state = Arc::new(AppState::new(self.admin.clone(), api_key));

        let addr: SocketAddr = format!("{}:{}", self.config.server.bind, self.config.server.port)
            .parse()
            .context("Invalid server.bind / server.port")?;

        info!(
            engine = self.admin.engine_name(),
            "Starting HTTP server on http://{}", addr
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/v1/version", get(version))
        .route("/api/v1/ipsec/users", get(list_users).post(add_user))
        .route("/api/v1/ipsec/users/{username}", delete(remove_user))
        .route(
            "/api/v1/openvpn/profiles",
            get(list_profiles).post(create_profiles),
        )
        .route("/api/v1/openvpn/profiles/{name}", delete(delete_profile))
        .route("/api/v1/system/restart", post(restart_all))
        .route("/api/v1/restart/container", post(restart_container))
        .route("/api/v1/restart/service", post(restart_service))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

// Error response type
struct AppError(AdminError);

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        AppError(err)
    }
}

fn status_for(err: &AdminError) -> StatusCode {
    match err {
        AdminError::Validation(_) => StatusCode::BAD_REQUEST,
        AdminError::Protected(_) => StatusCode::FORBIDDEN,
        AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        AdminError::Conflict(_) => StatusCode::CONFLICT,
        AdminError::PartialFailure { .. } | AdminError::Io { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        AdminError::Execution(crate::exec::ExecutionError::Timeout(_)) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        AdminError::Execution(_) | AdminError::MissingArtifact(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if status.is_server_error() {
            let detail = match err {
                AdminError::Execution(ref e) => e.detail().unwrap_or_default().to_string(),
                _ => String::new(),
            };
            warn!(category = err.category(), "Request failed: {} {}", err, detail);
        }

        let mut body = json!({
            "status": "error",
            "category": err.category(),
            "message": err.to_string(),
        });
        if let AdminError::PartialFailure {
            ref completed,
            ref failed,
        } = err
        {
            body["completed"] = json!(completed);
            body["failed"] = json!(failed);
        }
        (status, Json(body)).into_response()
    }
}

/// Wrap `payload` (an object) in the success envelope.
fn ok(mut payload: Value) -> Response {
    if let Value::Object(ref mut map) = payload {
        map.insert("status".to_string(), json!("ok"));
    }
    Json(payload).into_response()
}

fn body_error(rejection: JsonRejection) -> AppError {
    AppError(AdminError::Validation(InvalidInput(format!(
        "invalid request body: {}",
        rejection.body_text()
    ))))
}

// Health check endpoint
async fn health_check() -> Response {
    ok(json!({}))
}

async fn version(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.admin.engine_name(),
    }))
}

// IPSec users
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let users = state.admin.list_ipsec_users().await?;
    Ok(ok(json!({ "count": users.len(), "users": users })))
}

#[derive(Deserialize)]
struct AddUserRequest {
    username: String,
    #[serde(default)]
    password: Option<String>,
}

async fn add_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body.map_err(body_error)?;
    let password = state
        .admin
        .add_ipsec_user(&request.username, request.password.as_deref())
        .await?;
    Ok(ok(json!({
        "message": format!("User {} added successfully", request.username),
        "username": request.username,
        "password": password,
    })))
}

async fn remove_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    state.admin.remove_ipsec_user(&username).await?;
    Ok(ok(json!({
        "message": format!("User {} removed successfully", username),
    })))
}

// OpenVPN profiles
#[derive(Deserialize)]
struct ListProfilesQuery {
    include_content: Option<String>,
}

async fn list_profiles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProfilesQuery>,
) -> Result<Response, AppError> {
    let include_content = query.include_content.as_deref() == Some("true");
    let profiles = state.admin.list_openvpn_profiles(include_content).await?;
    Ok(ok(json!({
        "data": { "count": profiles.len(), "profiles": profiles },
    })))
}

#[derive(Deserialize)]
struct BatchItem {
    name: String,
}

/// `{"client_name": ".."}` or `[{"name": ".."}, ...]`
#[derive(Deserialize)]
#[serde(untagged)]
enum CreateProfilesRequest {
    Single { client_name: String },
    Batch(Vec<BatchItem>),
}

async fn create_profiles(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateProfilesRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body.map_err(body_error)?;
    match request {
        CreateProfilesRequest::Single { client_name } => {
            let created = state.admin.create_openvpn_profile(&client_name).await?;
            Ok(ok(json!({
                "message": format!("OpenVPN profile '{}' created successfully", client_name),
                "profile": created.profile,
                "output": created.output,
            })))
        }
        CreateProfilesRequest::Batch(items) => {
            let names: Vec<String> = items.into_iter().map(|i| i.name).collect();
            let created = state.admin.create_openvpn_profiles(&names).await?;
            Ok(ok(json!({
                "message": format!("{} OpenVPN profile(s) created successfully", created.len()),
                "count": created.len(),
                "profiles": created,
            })))
        }
    }
}

async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let output = state.admin.delete_openvpn_profile(&name).await?;
    Ok(ok(json!({
        "message": format!("OpenVPN profile '{}' deleted successfully", name),
        "output": output,
    })))
}

// Lifecycle
async fn restart_all(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state.admin.restart_all().await?;
    Ok(ok(json!({
        "message": "IPSec and OpenVPN services restarted successfully",
    })))
}

async fn restart_container(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state.admin.restart_ipsec().await?;
    Ok(ok(json!({
        "message": "IPSec container restarted successfully",
    })))
}

async fn restart_service(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let output = state.admin.restart_openvpn().await?;
    Ok(ok(json!({
        "message": "OpenVPN service restarted successfully",
        "output": output,
    })))
}
