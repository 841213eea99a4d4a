//! anneal-ec2: security group convergence daemon.
//!
//! This daemon:
//! - Loads declared security groups from a JSON file
//! - Resumes tasks left in flight
//! - Periodically checks every group against the cloud driver
//! - Submits upsert jobs to the orchestrator when a group drifts

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anneal_core::clients::HttpOrchestrator;
use anneal_core::retry::RetryConfig;
use anneal_core::store::{MemoryResourceLock, MemoryResourceRepository, MemoryStatusRepository};
use anneal_core::{
    ConvergenceController, ExecutionTracker, Resource, ResourceCheckQueue, TrackerConfig,
};
use anneal_ec2::{
    CloudDriver, HttpCloudDriver, NetworkCache, NormalizerConfig, SecurityGroup,
    SecurityGroupHandler, SelfReferenceGrant, SECURITY_GROUP_KIND,
};

/// anneal EC2 security group controller
#[derive(Parser, Debug)]
#[command(name = "anneal-ec2", version, about)]
struct Args {
    /// Cloud driver endpoint
    #[arg(long, default_value = "http://localhost:7002")]
    clouddriver_endpoint: String,

    /// Orchestrator endpoint
    #[arg(long, default_value = "http://localhost:8083")]
    orchestrator_endpoint: String,

    /// JSON file with the declared security groups
    #[arg(long)]
    resources: PathBuf,

    /// Check interval in seconds
    #[arg(long, default_value = "60")]
    check_interval: u64,

    /// Network cache refresh interval in seconds
    #[arg(long, default_value = "300")]
    network_refresh_interval: u64,

    /// Task status poll interval in seconds
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    /// Seconds to wait for a task before giving up
    #[arg(long, default_value = "600")]
    task_timeout: u64,

    /// Submission attempts before giving up
    #[arg(long, default_value = "5")]
    submit_attempts: u32,

    /// Self-reference grant applied by the provider, e.g. tcp:0-65535
    #[arg(long)]
    implicit_self_reference: Option<SelfReferenceGrant>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "anneal_ec2=info,anneal_core=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting anneal-ec2");
    info!("Cloud driver endpoint: {}", args.clouddriver_endpoint);
    info!("Orchestrator endpoint: {}", args.orchestrator_endpoint);

    let specs = load_resources(&args.resources).await?;

    let driver: Arc<dyn CloudDriver> = Arc::new(HttpCloudDriver::new(&args.clouddriver_endpoint));
    let networks = Arc::new(NetworkCache::new());
    if let Err(e) = networks.refresh(driver.as_ref()).await {
        warn!("Initial network refresh failed: {}", e);
    }

    let handler = SecurityGroupHandler::new(
        driver.clone(),
        networks.clone(),
        NormalizerConfig {
            implicit_self_reference: args.implicit_self_reference,
        },
    );

    let tracker = ExecutionTracker::new(
        Arc::new(HttpOrchestrator::new(&args.orchestrator_endpoint)),
        TrackerConfig {
            submit_retry: RetryConfig::with_max_attempts(args.submit_attempts),
            poll_interval: Duration::from_secs(args.poll_interval),
            timeout: Duration::from_secs(args.task_timeout),
        },
    );

    let controller = Arc::new(ConvergenceController::new(
        Arc::new(handler),
        Arc::new(MemoryResourceRepository::new()),
        Arc::new(MemoryStatusRepository::new()),
        Arc::new(MemoryResourceLock::new()),
        tracker,
    ));

    for spec in specs {
        let name = spec.resource_name();
        controller
            .manage(Resource::new(SECURITY_GROUP_KIND, name, spec))
            .await
            .context("Failed to register security group")?;
    }

    // Resume tasks persisted as in flight
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            match controller.recover().await {
                Ok(resumed) if !resumed.is_empty() => {
                    info!("Resumed {} in-flight tasks", resumed.len())
                }
                Ok(_) => {}
                Err(e) => error!("Failed to recover in-flight tasks: {}", e),
            }
        });
    }

    let (queue, worker) = ResourceCheckQueue::new(controller.clone());
    tokio::spawn(worker.run());

    {
        let queue = queue.clone();
        let controller = controller.clone();
        let period = Duration::from_secs(args.check_interval);
        tokio::spawn(async move { queue.run_periodic(controller, period).await });
    }

    tokio::spawn(refresh_networks(
        networks,
        driver,
        Duration::from_secs(args.network_refresh_interval),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    Ok(())
}

async fn load_resources(path: &Path) -> Result<Vec<SecurityGroup>> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let specs: Vec<SecurityGroup> = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    info!("Loaded {} security groups from {}", specs.len(), path.display());
    Ok(specs)
}

async fn refresh_networks(cache: Arc<NetworkCache>, driver: Arc<dyn CloudDriver>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately and the cache was just filled
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = cache.refresh(driver.as_ref()).await {
            warn!("Network refresh failed: {}", e);
        }
    }
}
