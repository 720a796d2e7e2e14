use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use runservice_client::{
    GetLogsQuery, GetRunResponse, GetRunsQuery, GetRunsResponse, LogStream, RunActionKind,
    RunActionsRequest, RunCreateRequest, RunTaskActionKind, RunTaskActionsRequest,
};
use tracing::{debug, info, warn};

use crate::authz::{Caller, RunAuthorizer};
use crate::error::{ActionError, error_from_remote};
use crate::service::RunService;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRunsRequest {
    pub phase_filter: Vec<String>,
    pub group: String,
    pub last_run: bool,
    pub change_groups: Vec<String>,
    pub start_run_id: Option<String>,
    pub limit: usize,
    pub asc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetLogsRequest {
    pub run_id: String,
    pub task_id: Option<String>,
    pub setup: bool,
    pub step: u32,
    pub follow: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunActionType {
    Restart,
    Stop,
}

impl RunActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for RunActionType {
    type Err = ActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "restart" => Ok(Self::Restart),
            "stop" => Ok(Self::Stop),
            other => Err(ActionError::bad_request(format!(
                "wrong run action type {other:?}"
            ))),
        }
    }
}

/// Run mutation as received from the caller. `action_type` stays in its wire
/// form and is parsed before anything reaches the run service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunActionRequest {
    pub run_id: String,
    pub action_type: String,
    /// Only meaningful for restarts.
    pub from_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTaskActionType {
    Approve,
}

impl RunTaskActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
        }
    }
}

impl FromStr for RunTaskActionType {
    type Err = ActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "approve" => Ok(Self::Approve),
            other => Err(ActionError::bad_request(format!(
                "wrong run task action type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTaskActionRequest {
    pub run_id: String,
    pub task_id: String,
    pub action_type: String,
    pub approval_annotations: BTreeMap<String, String>,
}

/// Authorization gate in front of the run service.
///
/// Every operation that targets an existing run first fetches it and
/// authorizes against the group the run service reports, never against a
/// group supplied by the caller. The run can still change between that fetch
/// and the call that follows; consistency past that point is up to the run
/// service.
#[derive(Clone)]
pub struct ActionHandler {
    run_service: Arc<dyn RunService>,
    authorizer: Arc<dyn RunAuthorizer>,
}

impl ActionHandler {
    pub fn new(run_service: Arc<dyn RunService>, authorizer: Arc<dyn RunAuthorizer>) -> Self {
        Self {
            run_service,
            authorizer,
        }
    }

    pub async fn get_run(
        &self,
        caller: &Caller,
        run_id: &str,
    ) -> Result<GetRunResponse, ActionError> {
        let run = self.fetch_run(run_id).await?;
        self.ensure_can_get_run(caller, &run.run_config.group).await?;
        Ok(run)
    }

    pub async fn get_runs(
        &self,
        caller: &Caller,
        request: &GetRunsRequest,
    ) -> Result<GetRunsResponse, ActionError> {
        self.ensure_can_get_run(caller, &request.group).await?;

        let query = GetRunsQuery {
            phase_filter: request.phase_filter.clone(),
            groups: vec![request.group.clone()],
            last_run: request.last_run,
            change_groups: request.change_groups.clone(),
            start_run_id: request.start_run_id.clone(),
            limit: request.limit,
            asc: request.asc,
        };
        self.run_service
            .get_runs(&query)
            .await
            .map_err(error_from_remote)
    }

    pub async fn get_logs(
        &self,
        caller: &Caller,
        request: &GetLogsRequest,
    ) -> Result<LogStream, ActionError> {
        let run = self.fetch_run(&request.run_id).await?;
        self.ensure_can_get_run(caller, &run.run_config.group).await?;

        let query = GetLogsQuery {
            run_id: request.run_id.clone(),
            task_id: request.task_id.clone(),
            setup: request.setup,
            step: request.step,
            follow: request.follow,
            stream: request.stream,
        };
        self.run_service
            .get_logs(&query)
            .await
            .map_err(error_from_remote)
    }

    pub async fn run_action(
        &self,
        caller: &Caller,
        request: &RunActionRequest,
    ) -> Result<(), ActionError> {
        let action_type = request.action_type.parse::<RunActionType>()?;

        let run = self.fetch_run(&request.run_id).await?;
        let group = &run.run_config.group;
        self.ensure_can_do_run_actions(caller, group).await?;

        info!(
            run_id = %request.run_id,
            group = %group,
            action = action_type.as_str(),
            subject = caller.subject.as_deref().unwrap_or("anonymous"),
            "dispatching run action"
        );

        let result = match action_type {
            RunActionType::Restart => {
                let create = RunCreateRequest {
                    run_id: Some(request.run_id.clone()),
                    from_start: request.from_start,
                };
                self.run_service.create_run(&create).await
            }
            RunActionType::Stop => {
                let stop = RunActionsRequest {
                    action_type: RunActionKind::Stop,
                };
                self.run_service.run_actions(&request.run_id, &stop).await
            }
        };
        result.map_err(error_from_remote)
    }

    pub async fn run_task_action(
        &self,
        caller: &Caller,
        request: &RunTaskActionRequest,
    ) -> Result<(), ActionError> {
        let action_type = request.action_type.parse::<RunTaskActionType>()?;

        let run = self.fetch_run(&request.run_id).await?;
        let group = &run.run_config.group;
        self.ensure_can_do_run_actions(caller, group).await?;

        info!(
            run_id = %request.run_id,
            task_id = %request.task_id,
            group = %group,
            action = action_type.as_str(),
            subject = caller.subject.as_deref().unwrap_or("anonymous"),
            "dispatching run task action"
        );

        let result = match action_type {
            RunTaskActionType::Approve => {
                let approve = RunTaskActionsRequest {
                    action_type: RunTaskActionKind::Approve,
                    approval_annotations: request.approval_annotations.clone(),
                };
                self.run_service
                    .run_task_actions(&request.run_id, &request.task_id, &approve)
                    .await
            }
        };
        result.map_err(error_from_remote)
    }

    async fn fetch_run(&self, run_id: &str) -> Result<GetRunResponse, ActionError> {
        self.run_service.get_run(run_id).await.map_err(|error| {
            debug!(run_id, %error, "run fetch failed");
            error_from_remote(error)
        })
    }

    async fn ensure_can_get_run(&self, caller: &Caller, group: &str) -> Result<(), ActionError> {
        let allowed = self
            .authorizer
            .can_get_run(caller, group)
            .await
            .inspect_err(|error| warn!(group, %error, "run view permission check failed"))?;
        if !allowed {
            debug!(group, subject = ?caller.subject, "run view denied");
            return Err(ActionError::Forbidden);
        }
        Ok(())
    }

    async fn ensure_can_do_run_actions(
        &self,
        caller: &Caller,
        group: &str,
    ) -> Result<(), ActionError> {
        let allowed = self
            .authorizer
            .can_do_run_actions(caller, group)
            .await
            .inspect_err(|error| warn!(group, %error, "run action permission check failed"))?;
        if !allowed {
            debug!(group, subject = ?caller.subject, "run action denied");
            return Err(ActionError::Forbidden);
        }
        Ok(())
    }
}
