#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tandem_core::target::sync_target_key;
use tandem_core::wellknown::SYNCER_NAMESPACE_PREFIX;
use tandem_core::{downstream_namespace_for, locator_for, ResourceType, SyncTarget};
use tandem_kubehub::{load_config, spawn_informer, ClusterScope, KubeRemote};
use tandem_store::InformerCache;
use tandem_syncer::{downstream_informer_options, upstream_informer_options, Syncer, SyncerConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tandemctl", version, about = "Tandem upstream/downstream syncer")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync configured resources between the upstream control plane and this cluster
    Run(RunArgs),
    /// Print the downstream namespace an upstream namespace maps to
    Locate {
        /// Logical cluster of the upstream namespace
        #[arg(long)]
        cluster: String,
        /// Upstream namespace
        #[arg(long)]
        namespace: String,
        /// Scope the locator to a sync target (advanced scheduling)
        #[command(flatten)]
        target: OptionalTarget,
    },
    /// Print the short key derived from a sync target's workspace and name
    TargetKey {
        #[arg(long, env = "TANDEM_TARGET_WORKSPACE")]
        workspace: String,
        #[arg(long, env = "TANDEM_TARGET_NAME")]
        name: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Kubeconfig for the upstream control plane (in-cluster or default when unset)
    #[arg(long, env = "TANDEM_UPSTREAM_KUBECONFIG")]
    upstream_kubeconfig: Option<PathBuf>,
    #[arg(long, env = "TANDEM_UPSTREAM_CONTEXT")]
    upstream_context: Option<String>,
    /// Kubeconfig for the physical cluster (in-cluster or default when unset)
    #[arg(long, env = "TANDEM_DOWNSTREAM_KUBECONFIG")]
    downstream_kubeconfig: Option<PathBuf>,
    #[arg(long, env = "TANDEM_DOWNSTREAM_CONTEXT")]
    downstream_context: Option<String>,

    /// Workspace holding the sync target
    #[arg(long, env = "TANDEM_TARGET_WORKSPACE")]
    workspace: String,
    /// Sync target name
    #[arg(long = "target-name", env = "TANDEM_TARGET_NAME")]
    target_name: String,
    /// Sync target UID
    #[arg(long = "target-uid", env = "TANDEM_TARGET_UID")]
    target_uid: String,

    /// Per-target overlays, status annotations, finalizers and deletion intent
    #[arg(long, env = "TANDEM_ADVANCED_SCHEDULING", action = ArgAction::SetTrue)]
    advanced: bool,
    #[arg(long, env = "TANDEM_WORKERS", default_value_t = 2)]
    workers: usize,
    /// Informer resync period in seconds (0 disables)
    #[arg(long = "resync-secs", env = "TANDEM_RESYNC_SECS", default_value_t = 0)]
    resync_secs: u64,
    /// Resource types to sync, as resource.version.group
    #[arg(
        long,
        env = "TANDEM_RESOURCES",
        value_delimiter = ',',
        default_value = "deployments.v1.apps,secrets.v1,configmaps.v1,services.v1"
    )]
    resources: Vec<ResourceType>,
    /// Upstream API endpoint as reachable from downstream workloads
    #[arg(long = "upstream-url", env = "TANDEM_UPSTREAM_URL")]
    upstream_url: String,
    #[arg(long = "syncer-namespace-prefix", env = "TANDEM_SYNCER_NAMESPACE_PREFIX", default_value = SYNCER_NAMESPACE_PREFIX)]
    syncer_namespace_prefix: String,
}

impl RunArgs {
    fn syncer_config(&self) -> SyncerConfig {
        let target = SyncTarget::new(&self.workspace, &self.target_name, &self.target_uid);
        let mut config = SyncerConfig::new(target, &self.upstream_url);
        config.advanced_scheduling = self.advanced;
        config.workers = self.workers;
        config.resync_secs = self.resync_secs;
        config.resources = self.resources.clone();
        config.syncer_namespace_prefix = self.syncer_namespace_prefix.clone();
        config
    }
}

#[derive(Args, Debug)]
struct OptionalTarget {
    #[arg(long, requires_all = ["target_name", "target_uid"])]
    workspace: Option<String>,
    #[arg(long = "target-name", requires = "workspace")]
    target_name: Option<String>,
    #[arg(long = "target-uid", requires = "workspace")]
    target_uid: Option<String>,
}

impl OptionalTarget {
    fn target(&self) -> Option<SyncTarget> {
        match (&self.workspace, &self.target_name, &self.target_uid) {
            (Some(ws), Some(name), Some(uid)) => Some(SyncTarget::new(ws, name, uid)),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Placement {
    locator: tandem_core::NamespaceLocator,
    downstream_namespace: String,
}

fn init_tracing() {
    let env = std::env::var("TANDEM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TANDEM_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid TANDEM_METRICS_ADDR; expected host:port");
        }
    }
}

async fn run(args: RunArgs, output: Output) -> Result<()> {
    let config = args.syncer_config();
    if output == Output::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    let upstream_cfg = load_config(args.upstream_kubeconfig.as_deref(), args.upstream_context.as_deref())
        .await
        .context("loading upstream kubeconfig")?;
    let downstream_cfg = load_config(args.downstream_kubeconfig.as_deref(), args.downstream_context.as_deref())
        .await
        .context("loading downstream kubeconfig")?;
    let upstream = Arc::new(KubeRemote::new("upstream", upstream_cfg, ClusterScope::PerCluster)?);
    let downstream = Arc::new(KubeRemote::new("downstream", downstream_cfg, ClusterScope::Single)?);

    let mut watched: Vec<ResourceType> = config.synced_resources().cloned().collect();
    watched.push(ResourceType::namespaces());
    let mut upstream_cache = InformerCache::new();
    let mut downstream_cache = InformerCache::new();
    for gvr in &watched {
        upstream_cache.insert(spawn_informer(&upstream, gvr, upstream_informer_options(&config)).await?);
        downstream_cache.insert(spawn_informer(&downstream, gvr, downstream_informer_options(&config, gvr)).await?);
    }

    let syncer = Syncer::new(
        config,
        upstream.clone(),
        downstream.clone(),
        Arc::new(upstream_cache.clone()),
        Arc::new(downstream_cache.clone()),
    )?;
    syncer.register_handlers(&upstream_cache, &downstream_cache)?;

    info!(resources = watched.len(), "waiting for caches to sync");
    tokio::select! {
        synced = async { upstream_cache.wait_for_sync().await && downstream_cache.wait_for_sync().await } => {
            if !synced {
                bail!("an informer stopped before its first list");
            }
        }
        _ = signal::ctrl_c() => {
            info!("interrupted before caches synced");
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "cannot listen for ctrl-c");
            }
            info!("shutting down");
            cancel.cancel();
        }
    });
    syncer.run(cancel).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args, cli.output).await?,
        Commands::Locate { cluster, namespace, target } => {
            let target = target.target();
            let locator = locator_for(&cluster, &namespace, target.as_ref());
            let placement = Placement { downstream_namespace: downstream_namespace_for(&locator), locator };
            match cli.output {
                Output::Human => println!("{}", placement.downstream_namespace),
                Output::Json => println!("{}", serde_json::to_string_pretty(&placement)?),
            }
        }
        Commands::TargetKey { workspace, name } => {
            let key = sync_target_key(&workspace, &name);
            match cli.output {
                Output::Human => println!("{key}"),
                Output::Json => println!("{}", serde_json::json!({ "workspace": workspace, "name": name, "key": key })),
            }
        }
    }
    Ok(())
}
