//! HTTP client for the orchestration backend.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::clients::check_response;
use crate::error::Result;
use crate::orchestration::{OrchestrationBackend, OrchestrationRequest, TaskRef, TaskStatus};

#[derive(Debug, Deserialize)]
struct TaskRefResponse {
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
}

/// Talks to the orchestrator's REST API (`POST /ops`, `GET /tasks/{id}`).
#[derive(Clone, Debug)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOrchestrator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { client, endpoint }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl OrchestrationBackend for HttpOrchestrator {
    async fn orchestrate(&self, request: &OrchestrationRequest) -> Result<TaskRef> {
        debug!(
            application = %request.application,
            jobs = request.job.len(),
            "Submitting orchestration request"
        );
        let response = self
            .client
            .post(self.url("/ops"))
            .json(request)
            .send()
            .await?;
        let body: TaskRefResponse = check_response(response).await?.json().await?;
        Ok(TaskRef::new(body.reference))
    }

    async fn task_status(&self, task: &TaskRef) -> Result<TaskStatus> {
        let response = self
            .client
            .get(self.url(&format!("/tasks/{}", task.id())))
            .send()
            .await?;
        let body: TaskResponse = check_response(response).await?.json().await?;
        debug!(task = %task, status = %body.status, "Task status");
        Ok(TaskStatus::from_execution_status(&body.status))
    }
}
