//! Orchestration backend contract.
//!
//! The backend accepts a request carrying one or more jobs, answers with a
//! task reference right away, and reports the task's progress on demand.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// One imperative instruction for the backend, as a JSON object keyed the
/// way the backend's job schema expects (`type`, `application`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(pub Map<String, Value>);

impl Job {
    pub fn new(job_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::from(job_type));
        Self(fields)
    }

    /// Set a field, consuming and returning the job.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn job_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Request body submitted to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub application: String,
    pub description: String,
    pub job: Vec<Job>,
}

/// Opaque handle for a submitted task, e.g. `/tasks/01HF...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRef(String);

impl TaskRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The task id, i.e. the last path segment of the reference.
    pub fn id(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of a submitted task as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed(String),
}

impl TaskStatus {
    /// Map a backend execution status string.
    pub fn from_execution_status(status: &str) -> Self {
        match status {
            "SUCCEEDED" => TaskStatus::Succeeded,
            "TERMINAL" | "CANCELED" | "STOPPED" | "FAILED_CONTINUE" => {
                TaskStatus::Failed(format!("task ended with status {}", status))
            }
            _ => TaskStatus::Pending,
        }
    }
}

/// Orchestration backend (external collaborator).
#[async_trait]
pub trait OrchestrationBackend: Send + Sync {
    /// Submit a request; returns as soon as the backend accepted it.
    async fn orchestrate(&self, request: &OrchestrationRequest) -> Result<TaskRef>;

    /// Query the current status of a submitted task.
    async fn task_status(&self, task: &TaskRef) -> Result<TaskStatus>;
}
