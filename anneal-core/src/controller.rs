//! Convergence controller - drives each managed resource towards its spec.
//!
//! For one resource identity the steps check → diff → plan → submit → await
//! run strictly in sequence, and at most one attempt is active at a time.
//! Different identities converge concurrently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::handler::{Divergence, ResourceHandler};
use crate::orchestration::{OrchestrationRequest, TaskRef};
use crate::resource::{Resource, ResourceName};
use crate::status::{Phase, ResourceStatus};
use crate::store::{ResourceLock, ResourceRepository, StatusRepository};
use crate::tracker::{ExecutionTracker, TerminalStatus};

/// How long `delete_resource` waits between lock attempts while another
/// attempt for the same identity is still running.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Why a check did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another attempt for the identity is checking or converging.
    AlreadyInFlight,
    /// The identity was unmanaged or deleted.
    Unmanaged,
    /// No resource with that name is declared.
    NotManaged,
}

/// Result of one check or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Current state already matched the spec.
    InSync,
    /// An operation was submitted and completed successfully.
    Converged(TaskRef),
    /// The attempt failed; the reason is also recorded in the status.
    Failed(String),
    Skipped(SkipReason),
}

/// Orchestrates normalizer, diff, planner and tracker for one resource kind.
pub struct ConvergenceController<H: ResourceHandler> {
    handler: Arc<H>,
    resources: Arc<dyn ResourceRepository<H::Spec>>,
    statuses: Arc<dyn StatusRepository>,
    lock: Arc<dyn ResourceLock>,
    tracker: ExecutionTracker,
    /// Identities whose checks are suppressed.
    unmanaged: RwLock<HashSet<ResourceName>>,
    /// Lock owner id of this controller instance.
    instance_id: String,
}

impl<H: ResourceHandler> ConvergenceController<H> {
    pub fn new(
        handler: Arc<H>,
        resources: Arc<dyn ResourceRepository<H::Spec>>,
        statuses: Arc<dyn StatusRepository>,
        lock: Arc<dyn ResourceLock>,
        tracker: ExecutionTracker,
    ) -> Self {
        Self {
            handler,
            resources,
            statuses,
            lock,
            tracker,
            unmanaged: RwLock::new(HashSet::new()),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Start managing a resource (or replace its spec).
    pub async fn manage(&self, resource: Resource<H::Spec>) -> Result<()> {
        let name = resource.name().clone();
        self.unmanaged.write().await.remove(&name);
        self.resources.upsert(resource).await?;
        info!(resource = %name, "Resource managed");
        Ok(())
    }

    /// Stop managing a resource without touching the provider. An attempt
    /// that is already converging is still awaited by its own task.
    pub async fn unmanage(&self, name: &ResourceName) -> Result<()> {
        self.unmanaged.write().await.insert(name.clone());
        self.resources.remove(name).await?;
        info!(resource = %name, "Resource unmanaged");
        Ok(())
    }

    /// Names of all managed resources.
    pub async fn managed(&self) -> Result<Vec<ResourceName>> {
        self.resources.list().await
    }

    /// Last known status of a resource.
    pub async fn status(&self, name: &ResourceName) -> Result<Option<ResourceStatus>> {
        self.statuses.get(name).await
    }

    /// Check a resource and converge it if it diverged.
    pub async fn check_resource(&self, name: &ResourceName) -> CheckOutcome {
        if self.unmanaged.read().await.contains(name) {
            debug!(resource = %name, "Check suppressed, resource is unmanaged");
            return CheckOutcome::Skipped(SkipReason::Unmanaged);
        }

        match self.lock.try_acquire(name, &self.instance_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(resource = %name, "Check ignored, attempt already in flight");
                return CheckOutcome::Skipped(SkipReason::AlreadyInFlight);
            }
            Err(e) => {
                error!(resource = %name, error = %e, "Failed to acquire resource lock");
                return CheckOutcome::Failed(e.to_string());
            }
        }

        let outcome = match self.attempt(name).await {
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(name, &e).await,
        };

        self.release(name).await;
        outcome
    }

    /// Decommission a resource: exactly one delete operation, independent of
    /// any diff. Waits for an in-flight attempt on the same identity first,
    /// at most as long as the tracker waits for a task.
    pub async fn delete_resource(&self, name: &ResourceName) -> CheckOutcome {
        self.unmanaged.write().await.insert(name.clone());

        let acquire = async {
            loop {
                match self.lock.try_acquire(name, &self.instance_id).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => tokio::time::sleep(LOCK_RETRY_DELAY).await,
                    Err(e) => return Err(e),
                }
            }
        };
        let timeout = self.tracker.timeout();
        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(resource = %name, error = %e, "Failed to acquire resource lock");
                return CheckOutcome::Failed(e.to_string());
            }
            Err(_) => {
                warn!(resource = %name, timeout = ?timeout, "Resource lock still held, delete abandoned");
                return CheckOutcome::Failed(format!("timed out after {:?} waiting for resource lock", timeout));
            }
        }

        let outcome = match self.delete_locked(name).await {
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(name, &e).await,
        };

        self.release(name).await;
        outcome
    }

    /// Resume awaiting every task persisted as in flight, e.g. after a
    /// restart. Returns the outcome per resumed resource.
    pub async fn recover(&self) -> Result<Vec<(ResourceName, CheckOutcome)>> {
        let pending = self.statuses.in_flight().await?;
        if !pending.is_empty() {
            info!("Recovering {} in-flight attempts", pending.len());
        }

        let resumed = pending.into_iter().filter_map(|(name, status)| {
            status.in_flight.map(|task| async move {
                let outcome = self.resume(&name, task).await;
                (name, outcome)
            })
        });

        Ok(join_all(resumed).await)
    }

    async fn resume(&self, name: &ResourceName, task: TaskRef) -> CheckOutcome {
        match self.lock.try_acquire(name, &self.instance_id).await {
            Ok(true) => {}
            Ok(false) => return CheckOutcome::Skipped(SkipReason::AlreadyInFlight),
            Err(e) => return CheckOutcome::Failed(e.to_string()),
        }

        info!(resource = %name, task = %task, "Resuming in-flight task");
        let outcome = match self.finish(name, task).await {
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(name, &e).await,
        };

        self.release(name).await;
        outcome
    }

    async fn attempt(&self, name: &ResourceName) -> Result<CheckOutcome> {
        // A task submitted earlier (e.g. before a restart) is awaited, not
        // planned again.
        if let Some(task) = self.statuses.get(name).await?.and_then(|s| s.in_flight) {
            info!(resource = %name, task = %task, "Awaiting task still in flight");
            return self.finish(name, task).await;
        }

        let Some(resource) = self.resources.get(name).await? else {
            debug!(resource = %name, "No such managed resource");
            return Ok(CheckOutcome::Skipped(SkipReason::NotManaged));
        };

        self.set_phase(name, Phase::Checking).await?;

        let desired = self.handler.normalize(&resource.spec)?;
        let current = self.handler.current(&desired).await?;
        let diff = self.handler.diff(&desired, current.as_ref());

        if diff.is_empty() {
            debug!(resource = %name, "Resource is in sync");
            self.set_phase(name, Phase::Converged).await?;
            return Ok(CheckOutcome::InSync);
        }

        info!(
            resource = %name,
            missing = current.is_none(),
            "Resource diverged from spec"
        );
        self.set_phase(name, Phase::Diverged).await?;

        let operations = self.handler.plan(&diff);
        if operations.is_empty() {
            self.set_phase(name, Phase::Converged).await?;
            return Ok(CheckOutcome::InSync);
        }

        let request = self.handler.request(&resource.spec, operations);
        self.execute(name, &request).await
    }

    async fn delete_locked(&self, name: &ResourceName) -> Result<CheckOutcome> {
        let Some(resource) = self.resources.remove(name).await? else {
            warn!(resource = %name, "Delete requested for unknown resource");
            return Ok(CheckOutcome::Skipped(SkipReason::NotManaged));
        };

        info!(resource = %name, "Deleting resource");
        let operation = self.handler.plan_delete(&resource.spec);
        let request = self.handler.request(&resource.spec, vec![operation]);
        self.execute(name, &request).await
    }

    async fn execute(&self, name: &ResourceName, request: &OrchestrationRequest) -> Result<CheckOutcome> {
        let task = self.tracker.submit(request).await?;
        self.statuses
            .put(name, ResourceStatus::converging(task.clone()))
            .await?;
        self.finish(name, task).await
    }

    async fn finish(&self, name: &ResourceName, task: TaskRef) -> Result<CheckOutcome> {
        match self.tracker.await_terminal(&task).await {
            TerminalStatus::Succeeded => {
                info!(resource = %name, task = %task, "Resource converged");
                self.set_phase(name, Phase::Converged).await?;
                Ok(CheckOutcome::Converged(task))
            }
            TerminalStatus::Failed(reason) => {
                warn!(resource = %name, task = %task, reason = %reason, "Convergence failed");
                let reason = reason.to_string();
                self.statuses
                    .put(name, ResourceStatus::failed(reason.clone()))
                    .await?;
                Ok(CheckOutcome::Failed(reason))
            }
        }
    }

    async fn set_phase(&self, name: &ResourceName, phase: Phase) -> Result<()> {
        self.statuses.put(name, ResourceStatus::new(phase)).await
    }

    async fn record_failure(&self, name: &ResourceName, e: &Error) -> CheckOutcome {
        error!(resource = %name, error = %e, "Convergence attempt failed");
        if let Err(store_err) = self
            .statuses
            .put(name, ResourceStatus::failed(e.to_string()))
            .await
        {
            error!(resource = %name, error = %store_err, "Failed to record failure");
        }
        CheckOutcome::Failed(e.to_string())
    }

    async fn release(&self, name: &ResourceName) {
        if let Err(e) = self.lock.release(name, &self.instance_id).await {
            error!(resource = %name, error = %e, "Failed to release resource lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::{Job, OrchestrationBackend, TaskStatus};
    use crate::retry::RetryConfig;
    use crate::store::{MemoryResourceLock, MemoryResourceRepository, MemoryStatusRepository};
    use crate::tracker::TrackerConfig;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Handler over plain integer sets; `current` is whatever the test put
    /// into the shared cell, `None` meaning the resource does not exist.
    struct SetHandler {
        current: Mutex<Option<BTreeSet<u32>>>,
        unresolvable: u32,
    }

    struct SetDiff {
        missing: bool,
        added: Vec<u32>,
        removed: Vec<u32>,
    }

    impl Divergence for SetDiff {
        fn is_empty(&self) -> bool {
            !self.missing && self.added.is_empty() && self.removed.is_empty()
        }
    }

    enum SetOp {
        Upsert(Vec<u32>),
        Delete,
    }

    impl From<SetOp> for Job {
        fn from(op: SetOp) -> Job {
            match op {
                SetOp::Upsert(values) => Job::new("upsert").with("values", values),
                SetOp::Delete => Job::new("delete"),
            }
        }
    }

    #[async_trait]
    impl ResourceHandler for SetHandler {
        type Spec = BTreeSet<u32>;
        type Desired = BTreeSet<u32>;
        type Current = BTreeSet<u32>;
        type Diff = SetDiff;
        type Operation = SetOp;

        fn kind(&self) -> &'static str {
            "test.Set"
        }

        fn normalize(&self, spec: &Self::Spec) -> Result<Self::Desired> {
            if spec.contains(&self.unresolvable) {
                return Err(Error::reference("value", self.unresolvable.to_string()));
            }
            Ok(spec.clone())
        }

        async fn current(&self, _desired: &Self::Desired) -> Result<Option<Self::Current>> {
            Ok(self.current.lock().unwrap().clone())
        }

        fn diff(&self, desired: &Self::Desired, current: Option<&Self::Current>) -> SetDiff {
            let empty = BTreeSet::new();
            let cur = current.unwrap_or(&empty);
            SetDiff {
                missing: current.is_none(),
                added: desired.difference(cur).copied().collect(),
                removed: cur.difference(desired).copied().collect(),
            }
        }

        fn plan(&self, diff: &SetDiff) -> Vec<SetOp> {
            if diff.is_empty() {
                vec![]
            } else {
                vec![SetOp::Upsert(diff.added.clone())]
            }
        }

        fn plan_delete(&self, _spec: &Self::Spec) -> SetOp {
            SetOp::Delete
        }

        fn request(&self, _spec: &Self::Spec, operations: Vec<SetOp>) -> OrchestrationRequest {
            OrchestrationRequest {
                application: "test".into(),
                description: "converge".into(),
                job: operations.into_iter().map(Job::from).collect(),
            }
        }
    }

    /// Backend whose tasks stay pending until `release` is set.
    #[derive(Default)]
    struct GatedBackend {
        submitted: Mutex<Vec<OrchestrationRequest>>,
        release: AtomicBool,
        fail: AtomicBool,
        polls: AtomicU32,
    }

    #[async_trait]
    impl OrchestrationBackend for GatedBackend {
        async fn orchestrate(&self, request: &OrchestrationRequest) -> Result<TaskRef> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            Ok(TaskRef::new(format!("/tasks/{}", submitted.len())))
        }

        async fn task_status(&self, _task: &TaskRef) -> Result<TaskStatus> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.release.load(Ordering::SeqCst) {
                Ok(TaskStatus::Pending)
            } else if self.fail.load(Ordering::SeqCst) {
                Ok(TaskStatus::Failed("invalid rule".into()))
            } else {
                Ok(TaskStatus::Succeeded)
            }
        }
    }

    struct Fixture {
        controller: Arc<ConvergenceController<SetHandler>>,
        handler: Arc<SetHandler>,
        backend: Arc<GatedBackend>,
        statuses: Arc<MemoryStatusRepository>,
        lock: Arc<MemoryResourceLock>,
    }

    fn fixture(current: Option<BTreeSet<u32>>) -> Fixture {
        fixture_with_timeout(current, Duration::from_secs(5))
    }

    fn fixture_with_timeout(current: Option<BTreeSet<u32>>, timeout: Duration) -> Fixture {
        let handler = Arc::new(SetHandler {
            current: Mutex::new(current),
            unresolvable: 666,
        });
        let backend = Arc::new(GatedBackend::default());
        let statuses = Arc::new(MemoryStatusRepository::new());
        let lock = Arc::new(MemoryResourceLock::new());
        let tracker = ExecutionTracker::new(
            backend.clone(),
            TrackerConfig {
                submit_retry: RetryConfig::with_max_attempts(1),
                poll_interval: Duration::from_millis(5),
                timeout,
            },
        );
        let controller = Arc::new(ConvergenceController::new(
            handler.clone(),
            Arc::new(MemoryResourceRepository::new()),
            statuses.clone(),
            lock.clone(),
            tracker,
        ));
        Fixture {
            controller,
            handler,
            backend,
            statuses,
            lock,
        }
    }

    fn name() -> ResourceName {
        ResourceName::new("test.Set:one")
    }

    async fn manage(f: &Fixture, values: &[u32]) {
        let spec: BTreeSet<u32> = values.iter().copied().collect();
        f.controller
            .manage(Resource::new("test.Set", name(), spec))
            .await
            .unwrap();
    }

    fn submissions(f: &Fixture) -> usize {
        f.backend.submitted.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_in_sync_resource_submits_nothing() {
        let f = fixture(Some([1, 2].into()));
        manage(&f, &[1, 2]).await;

        assert_eq!(f.controller.check_resource(&name()).await, CheckOutcome::InSync);
        assert_eq!(submissions(&f), 0);
        let status = f.controller.status(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Converged);
    }

    #[tokio::test]
    async fn test_diverged_resource_converges() {
        let f = fixture(Some([1].into()));
        f.backend.release.store(true, Ordering::SeqCst);
        manage(&f, &[1, 2]).await;

        let outcome = f.controller.check_resource(&name()).await;
        assert_eq!(outcome, CheckOutcome::Converged(TaskRef::new("/tasks/1")));
        assert_eq!(submissions(&f), 1);

        let status = f.controller.status(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Converged);
        assert!(status.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_checks_submit_once() {
        let f = fixture(None);
        manage(&f, &[1]).await;

        let first = {
            let controller = f.controller.clone();
            tokio::spawn(async move { controller.check_resource(&name()).await })
        };

        // Wait until the first attempt is converging
        while f.backend.polls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = f.statuses.get(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Converging);

        let n = name();
        let (second, third) = tokio::join!(
            f.controller.check_resource(&n),
            f.controller.check_resource(&n)
        );
        assert_eq!(second, CheckOutcome::Skipped(SkipReason::AlreadyInFlight));
        assert_eq!(third, CheckOutcome::Skipped(SkipReason::AlreadyInFlight));

        f.backend.release.store(true, Ordering::SeqCst);
        assert!(matches!(first.await.unwrap(), CheckOutcome::Converged(_)));
        assert_eq!(submissions(&f), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_recorded_and_recheckable() {
        let f = fixture(None);
        f.backend.fail.store(true, Ordering::SeqCst);
        f.backend.release.store(true, Ordering::SeqCst);
        manage(&f, &[1]).await;

        let outcome = f.controller.check_resource(&name()).await;
        assert!(matches!(outcome, CheckOutcome::Failed(ref r) if r.contains("invalid rule")));

        let status = f.controller.status(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.last_failure.unwrap().contains("invalid rule"));

        // Failed is not sticky: the next check runs again
        f.backend.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            f.controller.check_resource(&name()).await,
            CheckOutcome::Converged(_)
        ));
        assert_eq!(submissions(&f), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_reference_submits_nothing() {
        let f = fixture(None);
        manage(&f, &[1, 666]).await;

        let outcome = f.controller.check_resource(&name()).await;
        assert!(matches!(outcome, CheckOutcome::Failed(ref r) if r.contains("666")));
        assert_eq!(submissions(&f), 0);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_skipped() {
        let f = fixture(None);
        assert_eq!(
            f.controller.check_resource(&name()).await,
            CheckOutcome::Skipped(SkipReason::NotManaged)
        );
    }

    #[tokio::test]
    async fn test_delete_submits_single_delete_even_when_in_sync() {
        let f = fixture(Some([1].into()));
        f.backend.release.store(true, Ordering::SeqCst);
        manage(&f, &[1]).await;

        let outcome = f.controller.delete_resource(&name()).await;
        assert!(matches!(outcome, CheckOutcome::Converged(_)));

        let submitted = f.backend.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job.len(), 1);
        assert_eq!(submitted[0].job[0].job_type(), Some("delete"));

        // Subsequent checks are suppressed
        assert_eq!(
            f.controller.check_resource(&name()).await,
            CheckOutcome::Skipped(SkipReason::Unmanaged)
        );
    }

    #[tokio::test]
    async fn test_unmanage_while_converging_still_awaits_task() {
        let f = fixture(None);
        manage(&f, &[1]).await;

        let first = {
            let controller = f.controller.clone();
            tokio::spawn(async move { controller.check_resource(&name()).await })
        };
        while f.backend.polls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        f.controller.unmanage(&name()).await.unwrap();
        assert_eq!(
            f.controller.check_resource(&name()).await,
            CheckOutcome::Skipped(SkipReason::Unmanaged)
        );

        f.backend.release.store(true, Ordering::SeqCst);
        assert!(matches!(first.await.unwrap(), CheckOutcome::Converged(_)));
        assert_eq!(submissions(&f), 1);

        // Managing it again lifts the suppression
        *f.handler.current.lock().unwrap() = Some([1].into());
        manage(&f, &[1]).await;
        assert_eq!(f.controller.check_resource(&name()).await, CheckOutcome::InSync);
    }

    #[tokio::test]
    async fn test_recover_resumes_persisted_task() {
        let f = fixture(None);
        f.backend.release.store(true, Ordering::SeqCst);
        f.statuses
            .put(&name(), ResourceStatus::converging(TaskRef::new("/tasks/41")))
            .await
            .unwrap();

        let recovered = f.controller.recover().await.unwrap();
        assert_eq!(
            recovered,
            vec![(name(), CheckOutcome::Converged(TaskRef::new("/tasks/41")))]
        );
        assert_eq!(submissions(&f), 0);

        let status = f.controller.status(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Converged);
        assert!(status.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_check_awaits_persisted_task_instead_of_resubmitting() {
        let f = fixture(None);
        f.backend.release.store(true, Ordering::SeqCst);
        manage(&f, &[1]).await;
        f.statuses
            .put(&name(), ResourceStatus::converging(TaskRef::new("/tasks/old")))
            .await
            .unwrap();

        let outcome = f.controller.check_resource(&name()).await;
        assert_eq!(outcome, CheckOutcome::Converged(TaskRef::new("/tasks/old")));
        assert_eq!(submissions(&f), 0);
        let status = f.controller.status(&name()).await.unwrap().unwrap();
        assert_eq!(status.phase, Phase::Converged);
        assert!(status.in_flight.is_none());

        // With nothing in flight the next check plans as usual
        let outcome = f.controller.check_resource(&name()).await;
        assert_eq!(outcome, CheckOutcome::Converged(TaskRef::new("/tasks/1")));
        assert_eq!(submissions(&f), 1);
    }

    #[tokio::test]
    async fn test_delete_gives_up_on_held_lock() {
        let f = fixture_with_timeout(Some([1].into()), Duration::from_millis(250));
        manage(&f, &[1]).await;
        assert!(f.lock.try_acquire(&name(), "other-instance").await.unwrap());

        let outcome = f.controller.delete_resource(&name()).await;
        let CheckOutcome::Failed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("resource lock"), "{reason}");
        assert_eq!(submissions(&f), 0);
        assert_eq!(f.controller.managed().await.unwrap(), vec![name()]);

        // Once the holder lets go the delete goes through
        f.lock.release(&name(), "other-instance").await.unwrap();
        f.backend.release.store(true, Ordering::SeqCst);
        let outcome = f.controller.delete_resource(&name()).await;
        assert!(matches!(outcome, CheckOutcome::Converged(_)), "{outcome:?}");
        assert_eq!(submissions(&f), 1);
    }
}
