//! Per-resource convergence status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestration::TaskRef;

/// Where a resource is in its convergence cycle.
///
/// `Idle -> Checking -> (Converged | Diverged -> Converging -> (Converged | Failed))`;
/// `Converged` and `Failed` are as eligible for a new check as `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Idle,
    Checking,
    Converged,
    Diverged,
    Converging,
    Failed,
}

/// Last known status of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub phase: Phase,
    pub last_failure: Option<String>,
    /// Task being awaited while `Converging`; persisted so the attempt can
    /// be resumed after a restart.
    pub in_flight: Option<TaskRef>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceStatus {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            last_failure: None,
            in_flight: None,
            updated_at: Utc::now(),
        }
    }

    pub fn converging(task: TaskRef) -> Self {
        Self {
            in_flight: Some(task),
            ..Self::new(Phase::Converging)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            last_failure: Some(reason.into()),
            ..Self::new(Phase::Failed)
        }
    }
}

impl Default for ResourceStatus {
    fn default() -> Self {
        Self::new(Phase::Idle)
    }
}
