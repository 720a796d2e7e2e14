use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

mod types;

pub use types::{
    GetLogsQuery, GetRunResponse, GetRunsQuery, GetRunsResponse, Run, RunActionKind,
    RunActionsRequest, RunConfig, RunConfigTask, RunCreateRequest, RunPhase, RunResult, RunTask,
    RunTaskActionKind, RunTaskActionsRequest, RunTaskStatus, RunTaskStep,
};

use types::RemoteErrorBody;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;
pub const API_PREFIX: &str = "/api/v1alpha";

#[derive(Debug, Clone)]
pub struct RunServiceClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl RunServiceClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunServiceClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum RunServiceClientError {
    #[error("runservice_client_base_url_missing")]
    BaseUrlMissing,
    #[error("runservice_client_invalid_path")]
    InvalidPath,
    #[error("runservice_client_invalid_id:{id:?}")]
    InvalidId { id: String },
    #[error("runservice_client_build_failed:{message}")]
    Build { message: String },
    #[error("runservice_request_failed:{message}")]
    Request { message: String, timeout: bool },
    #[error("runservice_read_failed:{message}")]
    Read { message: String },
    #[error("runservice_http_{status}:{message}")]
    Http { status: StatusCode, message: String },
    #[error("runservice_json_decode_failed:{message}")]
    Decode { message: String },
}

impl RunServiceClientError {
    /// HTTP status reported by the run service, if the request got that far.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type LogBody = Pin<Box<dyn Stream<Item = Result<Bytes, RunServiceClientError>> + Send>>;

/// Open log response from the run service. The body is read lazily so
/// followed logs flow through as the run service produces them.
pub struct LogStream {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: LogBody,
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl RunServiceClient {
    pub fn new(config: RunServiceClientConfig) -> Result<Self, RunServiceClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(250));
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|error| RunServiceClientError::Build {
                message: error.to_string(),
            })?;
        Ok(Self {
            base_url,
            timeout,
            request_attempts: config.request_attempts.max(1),
            http,
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    pub fn run_path(run_id: &str) -> Result<String, RunServiceClientError> {
        Ok(format!("{API_PREFIX}/runs/{}", path_segment(run_id)?))
    }

    #[must_use]
    pub fn runs_path() -> String {
        format!("{API_PREFIX}/runs")
    }

    #[must_use]
    pub fn logs_path() -> String {
        format!("{API_PREFIX}/logs")
    }

    pub fn run_actions_path(run_id: &str) -> Result<String, RunServiceClientError> {
        Ok(format!("{API_PREFIX}/runs/{}/actions", path_segment(run_id)?))
    }

    pub fn run_task_actions_path(
        run_id: &str,
        task_id: &str,
    ) -> Result<String, RunServiceClientError> {
        Ok(format!(
            "{API_PREFIX}/runs/{}/tasks/{}/actions",
            path_segment(run_id)?,
            path_segment(task_id)?
        ))
    }

    /// Flags are encoded by presence with an empty value.
    #[must_use]
    pub fn runs_query(query: &GetRunsQuery) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        for phase in &query.phase_filter {
            pairs.push(("phase", phase.clone()));
        }
        for group in &query.groups {
            pairs.push(("group", group.clone()));
        }
        if query.last_run {
            pairs.push(("lastrun", String::new()));
        }
        for change_group in &query.change_groups {
            pairs.push(("changegroup", change_group.clone()));
        }
        if let Some(start) = query
            .start_run_id
            .as_deref()
            .filter(|value| !value.is_empty())
        {
            pairs.push(("start", start.to_string()));
        }
        if query.limit > 0 {
            pairs.push(("limit", query.limit.to_string()));
        }
        if query.asc {
            pairs.push(("asc", String::new()));
        }
        pairs
    }

    #[must_use]
    pub fn logs_query(query: &GetLogsQuery) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("runid", query.run_id.clone())];
        if let Some(task_id) = query.task_id.as_deref().filter(|value| !value.is_empty()) {
            pairs.push(("taskid", task_id.to_string()));
        }
        if query.setup {
            pairs.push(("setup", String::new()));
        } else {
            pairs.push(("step", query.step.to_string()));
        }
        if query.follow {
            pairs.push(("follow", String::new()));
        }
        if query.stream {
            pairs.push(("stream", String::new()));
        }
        pairs
    }

    pub async fn get_run(&self, run_id: &str) -> Result<GetRunResponse, RunServiceClientError> {
        let response = self
            .send_get(Self::run_path(run_id)?.as_str(), &[], ReadBound::Response)
            .await?;
        decode_json_response(response).await
    }

    pub async fn get_runs(
        &self,
        query: &GetRunsQuery,
    ) -> Result<GetRunsResponse, RunServiceClientError> {
        let pairs = Self::runs_query(query);
        let response = self
            .send_get(Self::runs_path().as_str(), &pairs, ReadBound::Response)
            .await?;
        decode_json_response(response).await
    }

    /// The timeout never covers the log body, which is passed through at
    /// the pace of the reader. Followed logs may also wait indefinitely for
    /// the first byte, so only the connect timeout applies to them.
    pub async fn get_logs(&self, query: &GetLogsQuery) -> Result<LogStream, RunServiceClientError> {
        let pairs = Self::logs_query(query);
        let bound = if query.follow {
            ReadBound::Connect
        } else {
            ReadBound::Headers
        };
        let response = self
            .send_get(Self::logs_path().as_str(), &pairs, bound)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|error| RunServiceClientError::Read {
                    message: error.to_string(),
                })?;
            return Err(format_http_error(status, &bytes));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|error| RunServiceClientError::Read {
                message: error.to_string(),
            })
        });

        Ok(LogStream {
            status,
            content_type,
            body: Box::pin(body),
        })
    }

    pub async fn create_run(
        &self,
        request: &RunCreateRequest,
    ) -> Result<(), RunServiceClientError> {
        self.send_json(reqwest::Method::POST, Self::runs_path().as_str(), request)
            .await
    }

    pub async fn run_actions(
        &self,
        run_id: &str,
        request: &RunActionsRequest,
    ) -> Result<(), RunServiceClientError> {
        self.send_json(
            reqwest::Method::PUT,
            Self::run_actions_path(run_id)?.as_str(),
            request,
        )
        .await
    }

    pub async fn run_task_actions(
        &self,
        run_id: &str,
        task_id: &str,
        request: &RunTaskActionsRequest,
    ) -> Result<(), RunServiceClientError> {
        self.send_json(
            reqwest::Method::PUT,
            Self::run_task_actions_path(run_id, task_id)?.as_str(),
            request,
        )
        .await
    }

    // Mutations are not idempotent on the run service side and are sent once.
    async fn send_json<Req>(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: &Req,
    ) -> Result<(), RunServiceClientError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(RunServiceClientError::InvalidPath)?;
        let response = self
            .http
            .request(method, url.as_str())
            .header("x-request-id", new_request_id())
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RunServiceClientError::Read {
                message: error.to_string(),
            })?;
        Err(format_http_error(status, &bytes))
    }

    async fn send_get(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        bound: ReadBound,
    ) -> Result<reqwest::Response, RunServiceClientError> {
        let url = self.endpoint(path).ok_or(RunServiceClientError::InvalidPath)?;
        let mut last_error: Option<RunServiceClientError> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .get(url.as_str())
                .header("x-request-id", new_request_id())
                .query(query);

            let sent = match bound {
                ReadBound::Response => request
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(request_error),
                ReadBound::Headers => {
                    match tokio::time::timeout(self.timeout, request.send()).await {
                        Ok(result) => result.map_err(request_error),
                        Err(_) => Err(RunServiceClientError::Request {
                            message: "timed out waiting for response headers".to_string(),
                            timeout: true,
                        }),
                    }
                }
                ReadBound::Connect => request.send().await.map_err(request_error),
            };

            match sent {
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(error);
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RunServiceClientError::Request {
            message: "unknown".to_string(),
            timeout: false,
        }))
    }
}

/// How much of a GET the configured timeout covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadBound {
    /// Sending the request and reading the whole body.
    Response,
    /// Sending the request and receiving the response headers.
    Headers,
    /// Establishing the connection only.
    Connect,
}

/// Builds the error for a non-success run service response, preferring the
/// `message` field of a JSON error body over the raw body text.
pub fn format_http_error(status: StatusCode, body: &[u8]) -> RunServiceClientError {
    let message = serde_json::from_slice::<RemoteErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .and_then(non_empty_string)
        .or_else(|| non_empty_string(String::from_utf8_lossy(body).to_string()))
        .unwrap_or_else(|| "<empty>".to_string());
    RunServiceClientError::Http { status, message }
}

fn request_error(error: reqwest::Error) -> RunServiceClientError {
    RunServiceClientError::Request {
        timeout: error.is_timeout(),
        message: error.to_string(),
    }
}

/// Encodes one identifier as a single path segment. Dot segments are
/// rejected since they would be resolved away by the URL parser.
fn path_segment(id: &str) -> Result<String, RunServiceClientError> {
    let id = id.trim();
    if id.is_empty() || id == "." || id == ".." {
        return Err(RunServiceClientError::InvalidId { id: id.to_string() });
    }
    Ok(urlencoding::encode(id).into_owned())
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn normalize_base_url(base_url: &str) -> Result<String, RunServiceClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(RunServiceClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, RunServiceClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| RunServiceClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| RunServiceClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
