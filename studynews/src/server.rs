use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::{Error as JsonError, Json};
use rocket::{catch, catchers, get, post, routes, Build, Request, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::ServerConfig;

use crate::actions::{ActionError, BriefResponse, NewsActions, TopicRequest};
use crate::tools::ToolDefinition;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub actions: Arc<NewsActions>,
}

impl AppState {
    pub fn new(actions: Arc<NewsActions>) -> Self {
        Self {
            started_at: Utc::now(),
            actions,
        }
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: i64,
    pub readiness: String,
    pub issues: Vec<String>,
}

/// JSON error body shared by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

type ApiError = (Status, Json<ErrorBody>);

fn api_error(e: ActionError) -> ApiError {
    let status = match &e {
        ActionError::Validation(_) => Status::UnprocessableEntity,
        ActionError::NotReady(_) => Status::ServiceUnavailable,
        ActionError::Acquisition(_) => Status::BadGateway,
        ActionError::UnknownTool(_) => Status::NotFound,
        ActionError::InvalidResponse(_) => Status::InternalServerError,
    };
    if status.code >= 500 {
        tracing::error!(kind = e.kind(), error = %e, "request failed");
    } else {
        tracing::debug!(kind = e.kind(), error = %e, "request rejected");
    }
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Uptime plus the startup readiness verdict.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let readiness = state.actions.readiness();
    Json(StatusResponse {
        status: if readiness.is_serving() { "ok" } else { "unavailable" }.to_string(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        readiness: readiness.label().to_string(),
        issues: readiness.issues().to_vec(),
    })
}

#[get("/api/v1/tools")]
async fn list_tools(state: &State<AppState>) -> Json<Vec<ToolDefinition>> {
    Json(state.actions.tools())
}

/// Body that is not JSON, or not shaped like the request type.
fn malformed_body(what: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::debug!(error = %e, "malformed {} body", what);
    (
        Status::UnprocessableEntity,
        Json(ErrorBody {
            error: format!("malformed {}: {}", what, e),
            kind: "validation".to_string(),
        }),
    )
}

#[post("/api/v1/tools/fetchFullArticleContent", format = "json", data = "<args>")]
async fn fetch_article(
    state: &State<AppState>,
    args: Result<Json<Value>, JsonError<'_>>,
) -> Result<Json<Value>, ApiError> {
    let args = args.map_err(|e| malformed_body("tool arguments", e))?;
    state
        .actions
        .fetch_article(args.into_inner())
        .await
        .map(Json)
        .map_err(api_error)
}

#[post("/api/v1/brief", format = "json", data = "<body>")]
async fn brief(
    state: &State<AppState>,
    body: Result<Json<Value>, JsonError<'_>>,
) -> Result<Json<BriefResponse>, ApiError> {
    let body = body.map_err(|e| malformed_body("brief request", e))?;
    let request: TopicRequest =
        serde_json::from_value(body.into_inner()).map_err(|e| malformed_body("brief request", e))?;
    state.actions.brief(request).await.map(Json).map_err(api_error)
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: status.reason_lossy().to_string(),
            kind: "http".to_string(),
        }),
    )
}

/// Mount routes and catchers on `rocket` with `state` managed.
pub fn mount(rocket: Rocket<Build>, state: AppState) -> Rocket<Build> {
    rocket
        .manage(state)
        .mount("/", routes![health, status, list_tools, fetch_article, brief])
        .register("/", catchers![default_catcher])
}

/// Rocket instance bound to the `[server]` address and port.
pub fn build_rocket(server: &ServerConfig, state: AppState) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", server.address.clone()))
        .merge(("port", server.port));
    mount(rocket::custom(figment), state)
}

pub async fn launch_rocket(server: &ServerConfig, actions: Arc<NewsActions>) -> Result<()> {
    let rocket = build_rocket(server, AppState::new(actions));

    // Runs until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!(address = %server.address, port = server.port, "Starting Rocket HTTP server");
    rocket.launch().await.map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
