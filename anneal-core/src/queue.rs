//! Resource check queue - the inbound scheduling trigger.
//!
//! `schedule_check` only enqueues. A [`CheckWorker`] drains the queue and runs
//! each check as its own task, so checks of different resources proceed
//! concurrently while the controller keeps one attempt per identity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::controller::{CheckOutcome, ConvergenceController};
use crate::error::{Error, Result};
use crate::handler::ResourceHandler;
use crate::resource::{ResourceName, API_VERSION_V1};

const QUEUE_CAPACITY: usize = 256;

/// A request to check one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub name: ResourceName,
    pub api_version: String,
    pub kind: String,
}

/// Cloneable handle used to schedule checks.
#[derive(Clone, Debug)]
pub struct ResourceCheckQueue {
    tx: mpsc::Sender<CheckRequest>,
}

impl ResourceCheckQueue {
    pub fn new<H: ResourceHandler>(
        controller: Arc<ConvergenceController<H>>,
    ) -> (Self, CheckWorker<H>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, CheckWorker { rx, controller })
    }

    /// Enqueue a check for a resource.
    pub async fn schedule_check(
        &self,
        name: ResourceName,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<()> {
        let request = CheckRequest {
            name,
            api_version: api_version.into(),
            kind: kind.into(),
        };
        debug!(resource = %request.name, "Scheduling check");
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::Store("check queue closed".to_string()))
    }

    /// Schedule a check for every managed resource on a fixed period.
    /// Returns when the queue is closed.
    pub async fn run_periodic<H: ResourceHandler>(
        &self,
        controller: Arc<ConvergenceController<H>>,
        period: Duration,
    ) {
        info!("Checking resources with interval {:?}", period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let kind = controller.handler().kind();

        loop {
            ticker.tick().await;

            let names = match controller.managed().await {
                Ok(names) => names,
                Err(e) => {
                    error!(error = %e, "Failed to list managed resources");
                    continue;
                }
            };

            for name in names {
                if self.schedule_check(name, API_VERSION_V1, kind).await.is_err() {
                    info!("Check queue closed, stopping periodic checks");
                    return;
                }
            }
        }
    }
}

/// Drains a [`ResourceCheckQueue`].
pub struct CheckWorker<H: ResourceHandler> {
    rx: mpsc::Receiver<CheckRequest>,
    controller: Arc<ConvergenceController<H>>,
}

impl<H: ResourceHandler> CheckWorker<H> {
    /// Run until every queue handle has been dropped.
    pub async fn run(mut self) {
        let kind = self.controller.handler().kind();

        while let Some(request) = self.rx.recv().await {
            if request.kind != kind {
                warn!(
                    resource = %request.name,
                    kind = %request.kind,
                    "Ignoring check for unsupported kind"
                );
                continue;
            }

            let controller = Arc::clone(&self.controller);
            tokio::spawn(async move {
                let outcome = controller.check_resource(&request.name).await;
                match outcome {
                    CheckOutcome::Failed(reason) => {
                        warn!(resource = %request.name, reason = %reason, "Check failed")
                    }
                    outcome => {
                        debug!(resource = %request.name, api_version = %request.api_version, ?outcome, "Check finished")
                    }
                }
            });
        }

        info!("Check queue closed");
    }
}
