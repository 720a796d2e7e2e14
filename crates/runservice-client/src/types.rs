use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    SetupError,
    Queued,
    Cancelled,
    Running,
    Finished,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Stopped,
    Success,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTaskStatus {
    NotStarted,
    Skipped,
    Cancelled,
    Running,
    Stopped,
    Success,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskStep {
    pub phase: String,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTask {
    pub id: String,
    pub status: RunTaskStatus,
    #[serde(default)]
    pub waiting_approval: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approval_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<RunTaskStep>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub counter: u64,
    pub group: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub phase: RunPhase,
    pub result: RunResult,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub tasks: BTreeMap<String, RunTask>,
    #[serde(default)]
    pub enqueue_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub needs_approval: bool,
}

/// Immutable definition a run was created from. `group` is the authorization
/// scope of every run derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub id: String,
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub setup_errors: Vec<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub static_environment: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, RunConfigTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRunResponse {
    pub run: Run,
    pub run_config: RunConfig,
    #[serde(default)]
    pub change_groups_update_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRunsResponse {
    pub runs: Vec<Run>,
    #[serde(default)]
    pub change_groups_update_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRunsQuery {
    pub phase_filter: Vec<String>,
    pub groups: Vec<String>,
    pub last_run: bool,
    pub change_groups: Vec<String>,
    pub start_run_id: Option<String>,
    pub limit: usize,
    pub asc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetLogsQuery {
    pub run_id: String,
    pub task_id: Option<String>,
    pub setup: bool,
    pub step: u32,
    pub follow: bool,
    pub stream: bool,
}

/// Creates a new run. With `run_id` set the run service derives the new run
/// from an existing one (a restart).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub from_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunActionKind {
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActionsRequest {
    pub action_type: RunActionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTaskActionKind {
    Approve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskActionsRequest {
    pub action_type: RunTaskActionKind,
    #[serde(default)]
    pub approval_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
