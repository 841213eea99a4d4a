//! Shared test utilities for anneal-ec2 integration tests.
//!
//! [`MockProvider`] serves both the cloud driver and the orchestrator REST
//! APIs from one axum router. Submitted jobs are applied to the in-memory
//! groups right away and every task reports `SUCCEEDED`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anneal_core::store::{MemoryResourceLock, MemoryResourceRepository, MemoryStatusRepository};
use anneal_core::clients::HttpOrchestrator;
use anneal_core::retry::RetryConfig;
use anneal_core::{ConvergenceController, ExecutionTracker, Resource, ResourceName, TrackerConfig};
use anneal_ec2::{
    HttpCloudDriver, NetworkCache, NormalizerConfig, SecurityGroup, SecurityGroupHandler,
    SECURITY_GROUP_KIND,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Default)]
pub struct MockState {
    /// Observed groups by name.
    pub groups: BTreeMap<String, Value>,
    /// Every accepted `POST /ops` body.
    pub submitted: Vec<Value>,
    /// Answer `POST /ops` with 400.
    pub reject: bool,
}

pub struct MockProvider {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<MockState>>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl MockProvider {
    pub async fn spawn() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));

        let router = Router::new()
            .route(
                "/securityGroups/{account}/aws/{region}/{name}",
                get(get_security_group),
            )
            .route("/networks/aws", get(list_networks))
            .route("/ops", post(submit))
            .route("/tasks/{id}", get(task_status))
            .with_state(state.clone());

        // Port 0 lets the OS pick a free port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn group(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().groups.get(name).cloned()
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

type Shared = State<Arc<Mutex<MockState>>>;

async fn get_security_group(
    State(state): Shared,
    Path((account, region, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let state = state.lock().unwrap();
    match state.groups.get(&name) {
        Some(group) if group["accountName"] == account.as_str() && group["region"] == region.as_str() => {
            Ok(Json(group.clone()))
        }
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn list_networks() -> Json<Value> {
    Json(json!([
        {"cloudProvider": "aws", "id": "vpc-1", "name": "vpc0", "account": "prod", "region": "us-west-3"},
        {"cloudProvider": "aws", "id": "vpc-2", "name": "vpc0", "account": "test", "region": "us-west-3"}
    ]))
}

async fn submit(State(state): Shared, Json(body): Json<Value>) -> Result<Json<Value>, (StatusCode, String)> {
    let mut state = state.lock().unwrap();
    if state.reject {
        return Err((StatusCode::BAD_REQUEST, "invalid job".to_string()));
    }

    if let Some(jobs) = body["job"].as_array() {
        for job in jobs {
            apply(&mut state.groups, job);
        }
    }
    state.submitted.push(body);
    let id = state.submitted.len();
    Ok(Json(json!({ "ref": format!("/tasks/{}", id) })))
}

async fn task_status(Path(_id): Path<String>) -> Json<Value> {
    Json(json!({ "status": "SUCCEEDED" }))
}

/// Apply a job the way the provider would. A freshly created group gets only
/// the rules listed in the job.
fn apply(groups: &mut BTreeMap<String, Value>, job: &Value) {
    match job["type"].as_str() {
        Some("upsertSecurityGroup") => {
            let name = job["name"].as_str().unwrap_or_default().to_string();
            let region = job["regions"][0].clone();
            let mut rules = Vec::new();

            for ingress in job["securityGroupIngress"].as_array().into_iter().flatten() {
                rules.push(json!({
                    "protocol": ingress["type"],
                    "portRanges": [{"startPort": ingress["startPort"], "endPort": ingress["endPort"]}],
                    "securityGroup": {
                        "name": ingress["name"],
                        "accountName": ingress["accountName"],
                        "region": region,
                        "vpcId": ingress["vpcId"],
                    },
                }));
            }
            for ingress in job["ipIngress"].as_array().into_iter().flatten() {
                let cidr = ingress["cidr"].as_str().unwrap_or_default();
                let (ip, mask) = cidr.split_at(cidr.find('/').unwrap_or(cidr.len()));
                rules.push(json!({
                    "protocol": ingress["type"].as_str().unwrap_or_default().to_lowercase(),
                    "portRanges": [{"startPort": ingress["startPort"], "endPort": ingress["endPort"]}],
                    "range": {"ip": ip, "cidr": mask},
                }));
            }

            let id = format!("sg-{}", groups.len() + 1);
            groups.insert(
                name.clone(),
                json!({
                    "type": "aws",
                    "id": id,
                    "name": name,
                    "description": job["description"],
                    "accountName": job["accountName"],
                    "region": region,
                    "vpcId": job["vpcId"],
                    "moniker": {"app": job["application"]},
                    "inboundRules": rules,
                }),
            );
        }
        Some("deleteSecurityGroup") => {
            if let Some(name) = job["securityGroupName"].as_str() {
                groups.remove(name);
            }
        }
        _ => {}
    }
}

/// A controller wired to the mock over HTTP.
pub async fn controller(provider: &MockProvider) -> ConvergenceController<SecurityGroupHandler> {
    let driver = Arc::new(HttpCloudDriver::new(provider.url()));
    let networks = Arc::new(NetworkCache::new());
    networks
        .refresh(driver.as_ref())
        .await
        .expect("Failed to load networks");

    let handler = SecurityGroupHandler::new(driver, networks, NormalizerConfig::default());
    let tracker = ExecutionTracker::new(
        Arc::new(HttpOrchestrator::new(provider.url())),
        TrackerConfig {
            submit_retry: RetryConfig::with_max_attempts(2),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        },
    );

    ConvergenceController::new(
        Arc::new(handler),
        Arc::new(MemoryResourceRepository::new()),
        Arc::new(MemoryStatusRepository::new()),
        Arc::new(MemoryResourceLock::new()),
        tracker,
    )
}

pub async fn manage(
    controller: &ConvergenceController<SecurityGroupHandler>,
    spec: SecurityGroup,
) -> ResourceName {
    let name = spec.resource_name();
    controller
        .manage(Resource::new(SECURITY_GROUP_KIND, name.clone(), spec))
        .await
        .expect("Failed to manage resource");
    name
}

/// `fnord` in `prod/us-west-3`, declared from JSON.
pub fn security_group(rules: Value) -> SecurityGroup {
    serde_json::from_value(json!({
        "application": "storefront",
        "name": "fnord",
        "accountName": "prod",
        "region": "us-west-3",
        "vpcName": "vpc0",
        "description": "dummy security group",
        "inboundRules": rules,
    }))
    .expect("invalid security group")
}
