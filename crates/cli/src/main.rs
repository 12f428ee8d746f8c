use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::Client;
use svcwatch_core::{config, NamespaceFilter, WatcherConfig};
use svcwatch_kubehub::{watch_critical_services, watch_pods, watch_services, KubeCluster};
use svcwatch_reconcile::{scan_lame_services, spawn_reconciler, Cluster};
use tokio::{signal, sync::watch, task::JoinSet};
use tracing::{error, info, warn};

const DEFAULT_LOG_LEVEL: &str = "warn";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "service-watcher", version, about = "Warns about Services without endpoints and backs critical ones with a fallback Pod")]
struct Cli {
    /// Output format (check/pods)
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Path to a kubeconfig file (default: $KUBECONFIG, ~/.kube/config, then in-cluster)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(flatten)]
    watcher: WatcherArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct WatcherArgs {
    /// Name prefix of fallback Pods (`<prefix>-<service>`)
    #[arg(long, env = "POD_NAME_PREFIX", global = true, default_value = config::DEFAULT_POD_NAME_PREFIX)]
    pod_name_prefix: String,

    /// PodTemplate providing the fallback Pod spec
    #[arg(long, env = "POD_TEMPLATE", global = true, default_value = config::DEFAULT_POD_TEMPLATE)]
    pod_template: String,

    /// Namespace of the PodTemplate
    #[arg(long = "pod-template-ns", env = "POD_TEMPLATE_NS", global = true, default_value = config::DEFAULT_POD_TEMPLATE_NS)]
    pod_template_ns: String,

    /// Comma-separated namespace allow-list (empty: all namespaces)
    #[arg(long, env = "NAMESPACES", global = true, default_value = "")]
    namespaces: String,
}

impl WatcherArgs {
    fn to_config(&self) -> WatcherConfig {
        WatcherConfig {
            pod_name_prefix: self.pod_name_prefix.clone(),
            pod_template: self.pod_template.clone(),
            pod_template_namespace: self.pod_template_ns.clone(),
            namespaces: NamespaceFilter::parse(&self.namespaces),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Watch Services, Pods and CriticalServices and reconcile fallback Pods (default)
    Run,
    /// List Services that currently select no Pod, then exit
    Check,
    /// List all Pods with their IPs
    Pods,
}

/// Accept the usual level spellings (`WARNING`, `CRITICAL`) on top of tracing directives.
fn normalize_level(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "notset" => "trace".to_string(),
        _ => raw.trim().to_string(),
    }
}

fn init_tracing() {
    let raw = std::env::var("LOG_LEVEL").ok();
    let parsed = raw.as_deref().map(|r| tracing_subscriber::EnvFilter::try_new(normalize_level(r)));
    let (filter, bad) = match parsed {
        Some(Ok(f)) => (f, None),
        Some(Err(e)) => (tracing_subscriber::EnvFilter::new(DEFAULT_LOG_LEVEL), Some(e)),
        None => (tracing_subscriber::EnvFilter::new(DEFAULT_LOG_LEVEL), None),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    if let (Some(raw), Some(e)) = (raw, bad) {
        error!(value = %raw, error = %e, "bad value for LOG_LEVEL; using default");
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SVCWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SVCWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = cli.watcher.to_config();
    let client = svcwatch_kubehub::client(cli.kubeconfig.as_deref()).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(client, config).await,
        Commands::Check => check(client, config, cli.output).await,
        Commands::Pods => pods(client, cli.output).await,
    }
}

async fn run(client: Client, config: WatcherConfig) -> Result<()> {
    info!(
        prefix = %config.pod_name_prefix,
        template = %config.pod_template,
        template_ns = %config.pod_template_namespace,
        namespaces = ?config.namespaces.namespaces(),
        "service-watcher starting"
    );
    let filter = config.namespaces.clone();
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let (tx, reconciler) = spawn_reconciler(cluster, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Adapters own every sender: the queue closes once they all stop.
    let mut adapters = JoinSet::new();
    adapters.spawn(watch_services(client.clone(), filter.clone(), tx.clone(), shutdown_rx.clone()));
    adapters.spawn(watch_pods(client.clone(), filter, tx.clone(), shutdown_rx.clone()));
    adapters.spawn(watch_critical_services(client, tx, shutdown_rx));

    let failure = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
            None
        }
        Some(res) = adapters.join_next() => Some(match res {
            Ok(Ok(())) => anyhow!("watch adapter stopped"),
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("watch adapter task failed"),
        }),
    };

    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(res) = adapters.join_next().await {
            if let Ok(Err(e)) = res {
                warn!(error = ?e, "watch adapter ended with error during shutdown");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("watch adapters did not stop in time; aborting");
        adapters.shutdown().await;
    }

    let state = reconciler.await.context("reconciler task")?;
    info!(lame = ?state.lame_services(), critical = state.critical_len(), "reconciler drained");

    match failure {
        Some(e) => {
            error!(error = ?e, "watch adapter failed");
            Err(e)
        }
        None => Ok(()),
    }
}

async fn check(client: Client, config: WatcherConfig, output: Output) -> Result<()> {
    let cluster = KubeCluster::new(client);
    let services = if config.namespaces.is_all() {
        cluster.list_all_services().await?
    } else {
        let mut all = Vec::new();
        for ns in config.namespaces.namespaces() {
            all.extend(cluster.list_services(ns).await.with_context(|| format!("listing services in {}", ns))?);
        }
        all
    };
    info!(services = services.len(), "check invoked");
    let lame = scan_lame_services(&cluster, &services).await.context("counting pods")?;

    match output {
        Output::Human => {
            if lame.is_empty() {
                println!("no lame services");
            }
            for name in &lame {
                println!("{} has no selected Pod", name);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&lame)?),
    }
    Ok(())
}

async fn pods(client: Client, output: Output) -> Result<()> {
    let pods = KubeCluster::new(client).list_pod_ips().await?;
    match output {
        Output::Human => {
            println!("Listing pods with their IPs:");
            for p in &pods {
                println!("{}\t{}\t{}", p.ip.as_deref().unwrap_or("-"), p.namespace, p.name);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&pods)?),
    }
    Ok(())
}
