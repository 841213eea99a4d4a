//! Execution tracker - submits operations and follows them to a terminal state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::orchestration::{OrchestrationBackend, OrchestrationRequest, TaskRef, TaskStatus};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Tracker settings.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Backoff for submissions that fail because the backend is unreachable.
    pub submit_retry: RetryConfig,
    /// Delay between two status queries.
    pub poll_interval: Duration,
    /// Budget for a task to reach a terminal status.
    pub timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            submit_retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Why a convergence attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The backend reported the task as failed.
    Rejected(String),
    /// No terminal status within the tracker's budget.
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected(msg) => write!(f, "rejected: {}", msg),
            FailureReason::Timeout => write!(f, "timed out waiting for task"),
        }
    }
}

/// Final outcome of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed(FailureReason),
}

/// Submits requests to the orchestration backend and awaits their outcome.
#[derive(Clone)]
pub struct ExecutionTracker {
    backend: Arc<dyn OrchestrationBackend>,
    config: TrackerConfig,
}

impl ExecutionTracker {
    pub fn new(backend: Arc<dyn OrchestrationBackend>, config: TrackerConfig) -> Self {
        Self { backend, config }
    }

    /// Budget for a task to reach a terminal status.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Submit a request. Transient failures are retried with backoff;
    /// rejections are returned right away.
    pub async fn submit(&self, request: &OrchestrationRequest) -> Result<TaskRef> {
        let task = retry_with_backoff(&self.config.submit_retry, "orchestrate", || {
            self.backend.orchestrate(request)
        })
        .await?;
        info!(task = %task, application = %request.application, "Task submitted");
        Ok(task)
    }

    /// Poll the task until it is terminal or the timeout expires.
    pub async fn await_terminal(&self, task: &TaskRef) -> TerminalStatus {
        match tokio::time::timeout(self.config.timeout, self.poll(task)).await {
            Ok(status) => status,
            Err(_) => {
                warn!(task = %task, timeout = ?self.config.timeout, "Task did not finish in time");
                TerminalStatus::Failed(FailureReason::Timeout)
            }
        }
    }

    async fn poll(&self, task: &TaskRef) -> TerminalStatus {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.backend.task_status(task).await {
                Ok(TaskStatus::Pending) => debug!(task = %task, "Task still running"),
                Ok(TaskStatus::Succeeded) => {
                    info!(task = %task, "Task succeeded");
                    return TerminalStatus::Succeeded;
                }
                Ok(TaskStatus::Failed(reason)) => {
                    warn!(task = %task, reason = %reason, "Task failed");
                    return TerminalStatus::Failed(FailureReason::Rejected(reason));
                }
                Err(e) if e.is_transient() => {
                    warn!(task = %task, error = %e, "Failed to query task status, will retry");
                }
                Err(Error::OperationRejected(msg)) => {
                    return TerminalStatus::Failed(FailureReason::Rejected(msg));
                }
                Err(e) => {
                    return TerminalStatus::Failed(FailureReason::Rejected(e.to_string()));
                }
            }
        }
    }
}
