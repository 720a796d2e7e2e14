#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use gateway_action::{
    ActionError, ActionErrorKind, ActionHandler, Caller, GetLogsRequest, GetRunsRequest,
    RemoteErrorKind, RunActionRequest, RunTaskActionRequest,
};
use runservice_client::RunServiceClient;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod api_envelope;
pub mod config;
pub mod policy;

use crate::api_envelope::{
    ApiErrorCode, ApiErrorTuple, error_response, ok_data, unauthorized_error, validation_error,
};
use crate::config::Config;
use crate::policy::GroupPolicy;

const SERVICE_NAME: &str = "gateway-service";

pub const ROUTE_RUNS: &str = "/api/v1alpha/runs";
pub const ROUTE_RUN_BY_ID: &str = "/api/v1alpha/runs/:run_id";
pub const ROUTE_RUN_ACTIONS: &str = "/api/v1alpha/runs/:run_id/actions";
pub const ROUTE_RUN_TASK_ACTIONS: &str = "/api/v1alpha/runs/:run_id/tasks/:task_id/actions";
pub const ROUTE_LOGS: &str = "/api/v1alpha/logs";

#[derive(Clone)]
pub struct AppState {
    handler: ActionHandler,
    policy: Arc<GroupPolicy>,
    started_at: SystemTime,
}

impl AppState {
    pub fn new(handler: ActionHandler, policy: Arc<GroupPolicy>) -> Self {
        Self {
            handler,
            policy,
            started_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ActionAccepted {
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    action_type: String,
}

#[derive(Debug, Deserialize)]
struct RunActionBody {
    action_type: String,
    #[serde(default)]
    from_start: bool,
}

#[derive(Debug, Deserialize)]
struct RunTaskActionBody {
    action_type: String,
    #[serde(default)]
    approval_annotations: BTreeMap<String, String>,
}

pub fn build_state(config: &Config) -> Result<AppState> {
    let client = RunServiceClient::new(config.runservice_client_config())?;
    let policy = match config.authz_policy_path.as_deref() {
        Some(path) => GroupPolicy::load(path)?,
        None => {
            warn!("no authorization policy configured; every request will be denied");
            GroupPolicy::default()
        }
    };
    let policy = Arc::new(policy);
    let handler = ActionHandler::new(Arc::new(client), policy.clone());
    Ok(AppState::new(handler, policy))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(ROUTE_RUNS, get(list_runs))
        .route(ROUTE_RUN_BY_ID, get(get_run))
        .route(ROUTE_RUN_ACTIONS, put(run_action))
        .route(ROUTE_RUN_TASK_ACTIONS, put(run_task_action))
        .route(ROUTE_LOGS, get(get_logs))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

pub async fn serve(config: Config) -> Result<()> {
    let state = build_state(&config)?;
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = SERVICE_NAME,
        bind_addr = %config.bind_addr,
        runservice_url = %config.runservice_url,
        "gateway listening"
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let caller = resolve_caller(&state, &headers)?;
    let run = state
        .handler
        .get_run(&caller, &run_id)
        .await
        .map_err(map_action_error)?;
    Ok(ok_data(run))
}

async fn list_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let caller = resolve_caller(&state, &headers)?;
    let request = runs_request_from_query(raw_query.as_deref())?;
    let page = state
        .handler
        .get_runs(&caller, &request)
        .await
        .map_err(map_action_error)?;
    Ok(ok_data(page))
}

async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiErrorTuple> {
    let caller = resolve_caller(&state, &headers)?;
    let request = logs_request_from_query(raw_query.as_deref())?;
    let logs = state
        .handler
        .get_logs(&caller, &request)
        .await
        .map_err(map_action_error)?;

    let mut response = Response::new(Body::from_stream(logs.body));
    *response.status_mut() = logs.status;
    let content_type = logs
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    if request.follow {
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    Ok(response)
}

async fn run_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(body): Json<RunActionBody>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let caller = resolve_caller(&state, &headers)?;
    let request = RunActionRequest {
        run_id,
        action_type: body.action_type,
        from_start: body.from_start,
    };
    state
        .handler
        .run_action(&caller, &request)
        .await
        .map_err(map_action_error)?;
    Ok(ok_data(ActionAccepted {
        run_id: request.run_id,
        task_id: None,
        action_type: request.action_type,
    }))
}

async fn run_task_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((run_id, task_id)): Path<(String, String)>,
    Json(body): Json<RunTaskActionBody>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let caller = resolve_caller(&state, &headers)?;
    let request = RunTaskActionRequest {
        run_id,
        task_id,
        action_type: body.action_type,
        approval_annotations: body.approval_annotations,
    };
    state
        .handler
        .run_task_action(&caller, &request)
        .await
        .map_err(map_action_error)?;
    Ok(ok_data(ActionAccepted {
        run_id: request.run_id,
        task_id: Some(request.task_id),
        action_type: request.action_type,
    }))
}

fn resolve_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiErrorTuple> {
    let token = bearer_token(headers);
    state
        .policy
        .authenticate(token.as_deref())
        .ok_or_else(|| unauthorized_error("Unauthenticated."))
}

fn map_action_error(error: ActionError) -> ApiErrorTuple {
    let message = error.to_string();
    match error.kind() {
        ActionErrorKind::Forbidden => error_response(ApiErrorCode::Forbidden, message),
        ActionErrorKind::BadRequest => error_response(ApiErrorCode::BadRequest, message),
        ActionErrorKind::Internal => {
            warn!(%error, "internal gateway failure");
            error_response(ApiErrorCode::InternalError, message)
        }
        ActionErrorKind::Remote(kind) => {
            let code = match kind {
                RemoteErrorKind::BadRequest => ApiErrorCode::BadRequest,
                RemoteErrorKind::Unauthorized => ApiErrorCode::Unauthorized,
                RemoteErrorKind::Forbidden => ApiErrorCode::Forbidden,
                RemoteErrorKind::NotFound => ApiErrorCode::NotFound,
                RemoteErrorKind::Conflict => ApiErrorCode::Conflict,
                RemoteErrorKind::Internal => ApiErrorCode::InternalError,
                RemoteErrorKind::Unavailable => ApiErrorCode::ServiceUnavailable,
            };
            if matches!(
                kind,
                RemoteErrorKind::Internal | RemoteErrorKind::Unavailable
            ) {
                warn!(%error, remote_kind = kind.as_str(), "run service failure");
            }
            error_response(code, message)
        }
    }
}

fn runs_request_from_query(raw_query: Option<&str>) -> Result<GetRunsRequest, ApiErrorTuple> {
    let mut request = GetRunsRequest::default();
    let mut groups = Vec::new();

    for (key, value) in query_pairs(raw_query) {
        match key.as_str() {
            "group" => groups.push(value),
            "phase" => request.phase_filter.push(value),
            "changegroup" => request.change_groups.push(value),
            "lastrun" => request.last_run = parse_flag("lastrun", &value)?,
            "start" => request.start_run_id = non_empty(value),
            "limit" => {
                request.limit = value.trim().parse().map_err(|_| {
                    validation_error("limit", "The limit must be a non-negative integer.")
                })?;
            }
            "asc" => request.asc = parse_flag("asc", &value)?,
            _ => {}
        }
    }

    if groups.len() > 1 {
        return Err(validation_error(
            "group",
            "Only one group may be queried at a time.",
        ));
    }
    request.group = groups
        .pop()
        .and_then(non_empty)
        .ok_or_else(|| validation_error("group", "The group field is required."))?;
    Ok(request)
}

fn logs_request_from_query(raw_query: Option<&str>) -> Result<GetLogsRequest, ApiErrorTuple> {
    let mut request = GetLogsRequest::default();
    let mut run_id = None;
    let mut step = None;

    for (key, value) in query_pairs(raw_query) {
        match key.as_str() {
            "runid" => run_id = non_empty(value),
            "taskid" => request.task_id = non_empty(value),
            "setup" => request.setup = parse_flag("setup", &value)?,
            "step" => {
                step = Some(value.trim().parse::<u32>().map_err(|_| {
                    validation_error("step", "The step must be a non-negative integer.")
                })?);
            }
            "follow" => request.follow = parse_flag("follow", &value)?,
            "stream" => request.stream = parse_flag("stream", &value)?,
            _ => {}
        }
    }

    request.run_id =
        run_id.ok_or_else(|| validation_error("runid", "The runid field is required."))?;
    match (request.setup, step) {
        (true, _) => {}
        (false, Some(step)) => request.step = step,
        (false, None) => {
            return Err(validation_error(
                "step",
                "The step field is required unless setup is requested.",
            ));
        }
    }
    Ok(request)
}

fn query_pairs(raw_query: Option<&str>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw_query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, ApiErrorTuple> {
    match value.trim().to_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(validation_error(field, "Expected a boolean flag.")),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = authorization.strip_prefix("Bearer ")?.trim();
    non_empty(token.to_string())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
