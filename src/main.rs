use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use cloud_node_operator::cloud::{fake::FakeCloud, CloudProvider};
use cloud_node_operator::config::{
    OperatorConfig, DEFAULT_CLOUD_TAINT_KEY, DEFAULT_PROVIDED_IP_LABEL,
};
use cloud_node_operator::controller::{self, retry::BackoffPolicy, ControllerState};
use cloud_node_operator::Error;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Cloud provider to use; only the in-memory `fake` provider ships
    /// with this binary, real adapters are wired in out of tree
    #[arg(long, env = "CLOUD_PROVIDER", default_value = "fake")]
    cloud_provider: String,

    /// Seconds between address reconciliation passes
    #[arg(long, env = "ADDRESS_SYNC_PERIOD_SECS", default_value_t = 10)]
    address_sync_period_secs: u64,

    /// Seconds between cloud-existence checks for not-Ready nodes
    #[arg(long, env = "NODE_MONITOR_PERIOD_SECS", default_value_t = 5)]
    node_monitor_period_secs: u64,

    /// Maximum attempts for a conflicting node update
    #[arg(long, env = "UPDATE_RETRY_STEPS", default_value_t = 20)]
    update_retry_steps: u32,

    /// Base delay in milliseconds for the conflict backoff
    #[arg(long, env = "UPDATE_RETRY_BASE_DELAY_MS", default_value_t = 50)]
    update_retry_base_delay_ms: u64,

    /// Taint key gating nodes until cloud enrichment completes
    #[arg(long, env = "CLOUD_TAINT_KEY", default_value = DEFAULT_CLOUD_TAINT_KEY)]
    cloud_taint_key: String,

    /// Label pinning an operator-supplied node IP
    #[arg(long, env = "PROVIDED_IP_LABEL", default_value = DEFAULT_PROVIDED_IP_LABEL)]
    provided_ip_label: String,

    /// Mark fresh nodes NetworkUnavailable until the provider programs routes
    #[arg(long, env = "DEFERRED_ROUTES")]
    deferred_routes: bool,

    /// Namespace used for the leader-election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "kube-system")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("cloud-node-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn build_cloud_provider(name: &str) -> Result<Arc<dyn CloudProvider>, Error> {
    match name {
        "fake" => {
            warn!("using the in-memory fake cloud provider; development mode only");
            Ok(Arc::new(FakeCloud::builder().build()))
        }
        other => Err(Error::ConfigError(format!(
            "unknown cloud provider {other:?}; this binary only ships the fake provider"
        ))),
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    info!(
        "Starting cloud-node-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let cloud = build_cloud_provider(&args.cloud_provider)?;
    if cloud.instances().is_none() {
        return Err(Error::ConfigError(format!(
            "cloud provider {} does not support instances",
            cloud.provider_name()
        )));
    }
    info!("Using cloud provider: {}", cloud.provider_name());

    let config = OperatorConfig {
        address_sync_period: Duration::from_secs(args.address_sync_period_secs),
        node_monitor_period: Duration::from_secs(args.node_monitor_period_secs),
        update_backoff: BackoffPolicy {
            steps: args.update_retry_steps,
            base_delay: Duration::from_millis(args.update_retry_base_delay_ms),
        },
        provided_ip_label: args.provided_ip_label,
        cloud_taint_key: args.cloud_taint_key,
        deferred_routes: args.deferred_routes,
    };

    // Leader election keeps the periodic loops single-writer across replicas
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));
    {
        let lease_client = client.clone();
        let lease_ns = args.namespace.clone();
        let identity = holder_identity.clone();
        let is_leader_bg = Arc::clone(&is_leader);

        tokio::spawn(async move {
            run_leader_election(lease_client, &lease_ns, &identity, is_leader_bg).await;
        });
    }

    let state = Arc::new(ControllerState {
        client: client.clone(),
        cloud,
        config,
        is_leader,
    });

    let (tx, rx) = controller::event_channel();
    let watch_api: Api<Node> = Api::all(client.clone());
    tokio::spawn(controller::watch_nodes(watch_api, tx));
    tokio::spawn(controller::run_initializer(state.clone(), rx));
    tokio::spawn(controller::run_address_sync(state.clone()));
    tokio::spawn(controller::run_reaper(state));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::ConfigError(format!("failed to listen for shutdown signal: {e}")))?;
    info!("Shutdown signal received");
    Ok(())
}

const LEASE_NAME: &str = "cloud-node-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get(LEASE_NAME).await {
        Ok(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| {
                    let duration = spec
                        .and_then(|s| s.lease_duration_seconds)
                        .unwrap_or(LEASE_DURATION_SECS);
                    let expiry = renew.0 + chrono::Duration::seconds(duration as i64);
                    now > expiry
                })
                .unwrap_or(true);

            if expired {
                info!(
                    "Lease held by {:?} has expired, taking over",
                    current_holder
                );
                let patch = serde_json::json!({
                    "spec": {
                        "holderIdentity": identity,
                        "acquireTime": MicroTime(now),
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: Some(k8s_openapi::api::coordination::v1::LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            leases.create(&PostParams::default(), &lease).await?;
            info!("Created lease {} with holder {}", LEASE_NAME, identity);
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
