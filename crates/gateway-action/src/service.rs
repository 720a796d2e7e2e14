use async_trait::async_trait;
use runservice_client::{
    GetLogsQuery, GetRunResponse, GetRunsQuery, GetRunsResponse, LogStream, RunActionsRequest,
    RunCreateRequest, RunServiceClient, RunServiceClientError, RunTaskActionsRequest,
};

/// Operations the gateway consumes from the run execution service.
#[async_trait]
pub trait RunService: Send + Sync {
    async fn get_run(&self, run_id: &str) -> Result<GetRunResponse, RunServiceClientError>;

    async fn get_runs(
        &self,
        query: &GetRunsQuery,
    ) -> Result<GetRunsResponse, RunServiceClientError>;

    async fn get_logs(&self, query: &GetLogsQuery) -> Result<LogStream, RunServiceClientError>;

    async fn create_run(&self, request: &RunCreateRequest) -> Result<(), RunServiceClientError>;

    async fn run_actions(
        &self,
        run_id: &str,
        request: &RunActionsRequest,
    ) -> Result<(), RunServiceClientError>;

    async fn run_task_actions(
        &self,
        run_id: &str,
        task_id: &str,
        request: &RunTaskActionsRequest,
    ) -> Result<(), RunServiceClientError>;
}

#[async_trait]
impl RunService for RunServiceClient {
    async fn get_run(&self, run_id: &str) -> Result<GetRunResponse, RunServiceClientError> {
        RunServiceClient::get_run(self, run_id).await
    }

    async fn get_runs(
        &self,
        query: &GetRunsQuery,
    ) -> Result<GetRunsResponse, RunServiceClientError> {
        RunServiceClient::get_runs(self, query).await
    }

    async fn get_logs(&self, query: &GetLogsQuery) -> Result<LogStream, RunServiceClientError> {
        RunServiceClient::get_logs(self, query).await
    }

    async fn create_run(&self, request: &RunCreateRequest) -> Result<(), RunServiceClientError> {
        RunServiceClient::create_run(self, request).await
    }

    async fn run_actions(
        &self,
        run_id: &str,
        request: &RunActionsRequest,
    ) -> Result<(), RunServiceClientError> {
        RunServiceClient::run_actions(self, run_id, request).await
    }

    async fn run_task_actions(
        &self,
        run_id: &str,
        task_id: &str,
        request: &RunTaskActionsRequest,
    ) -> Result<(), RunServiceClientError> {
        RunServiceClient::run_task_actions(self, run_id, task_id, request).await
    }
}
