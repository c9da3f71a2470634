use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use janitor_engine::config::{DEFAULT_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY};
use janitor_engine::{hooks, split_list, Janitor, JanitorConfig, WebhookNotifier};
use janitor_kubehub::KubeCluster;
use janitor_rules::RuleSet;
use tracing::{debug, error, info, warn};

mod shutdown;

#[derive(Parser, Debug)]
#[command(name = "kube-janitor", version, about = "Clean up Kubernetes resources after a TTL, expiry or rule match")]
struct Cli {
    /// Log what would be deleted or notified without doing it
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Debug logging (overrides JANITOR_LOG)
    #[arg(long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// Only log deletions and errors
    #[arg(long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Run a single cleanup and exit
    #[arg(long = "once", action = ArgAction::SetTrue)]
    once: bool,

    /// Seconds between cleanup runs
    #[arg(long = "interval", default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,

    /// Seconds to pause after each delete
    #[arg(long = "wait-after-delete", default_value_t = 0)]
    wait_after_delete: u64,

    /// Notify this many seconds before deletion (0 disables)
    #[arg(long = "delete-notification", default_value_t = 0)]
    delete_notification: u64,

    /// Comma-separated resource types to consider, or "all"
    #[arg(long = "include-resources", env = "INCLUDE_RESOURCES", default_value = "all")]
    include_resources: String,

    #[arg(long = "exclude-resources", env = "EXCLUDE_RESOURCES", default_value = "events,controllerrevisions,endpoints")]
    exclude_resources: String,

    /// Comma-separated namespaces to consider, or "all"
    #[arg(long = "include-namespaces", env = "INCLUDE_NAMESPACES", default_value = "all")]
    include_namespaces: String,

    #[arg(long = "exclude-namespaces", env = "EXCLUDE_NAMESPACES", default_value = "kube-system")]
    exclude_namespaces: String,

    /// Also clean up cluster-scoped resources (namespaces are always considered)
    #[arg(long = "include-cluster-resources", action = ArgAction::SetTrue)]
    include_cluster_resources: bool,

    /// YAML file with cleanup rules
    #[arg(long = "rules-file", env = "RULES_FILE")]
    rules_file: Option<String>,

    /// Annotation holding the deployment time used as TTL start
    #[arg(long = "deployment-time-annotation")]
    deployment_time_annotation: Option<String>,

    /// Worker tasks (0 = available parallelism)
    #[arg(long = "parallelism", default_value_t = 0)]
    parallelism: usize,

    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// POST delete notifications here
    #[arg(long = "webhook-url", env = "WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Prefix for notification messages, e.g. the cluster name
    #[arg(long = "context-name", env = "CONTEXT_NAME")]
    context_name: Option<String>,

    /// Named hook contributing extra `_context` facts
    #[arg(long = "resource-context-hook", env = "RESOURCE_CONTEXT_HOOK")]
    resource_context_hook: Option<String>,

    /// Serve Prometheus metrics on host:port
    #[arg(long = "metrics-addr", env = "JANITOR_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

impl Cli {
    fn config(&self) -> JanitorConfig {
        JanitorConfig {
            dry_run: self.dry_run,
            quiet: self.quiet,
            interval_secs: self.interval,
            wait_after_delete: Duration::from_secs(self.wait_after_delete),
            delete_notification: Duration::from_secs(self.delete_notification),
            include_resources: split_list(&self.include_resources),
            exclude_resources: split_list(&self.exclude_resources),
            include_namespaces: split_list(&self.include_namespaces),
            exclude_namespaces: split_list(&self.exclude_namespaces),
            include_cluster_resources: self.include_cluster_resources,
            deployment_time_annotation: self.deployment_time_annotation.clone(),
            parallelism: self.parallelism,
            queue_capacity: self.queue_capacity,
            context_name: self.context_name.clone(),
        }
    }
}

fn init_tracing(debug: bool) {
    let env = if debug {
        "debug".to_string()
    } else {
        std::env::var("JANITOR_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr.filter(|a| !a.is_empty()) else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid metrics address; expected host:port"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    init_metrics(cli.metrics_addr.as_deref());

    let config = cli.config();
    config.validate()?;
    let hook = cli
        .resource_context_hook
        .as_deref()
        .filter(|h| !h.is_empty())
        .map(hooks::resolve)
        .transpose()?;
    let rules = match &cli.rules_file {
        Some(path) => RuleSet::load_file(path).with_context(|| format!("loading rules from {path}"))?,
        None => RuleSet::default(),
    };
    info!(
        dry_run = config.dry_run,
        interval = config.interval_secs,
        rules = rules.len(),
        hook = hook.as_ref().map(|h| h.name()).unwrap_or("none"),
        workers = config.workers(),
        "kube-janitor starting"
    );

    let client = KubeCluster::try_default().await?;
    let notifier = WebhookNotifier::new(cli.webhook_url.clone());
    if notifier.is_configured() {
        info!("webhook notifications enabled");
    }
    let janitor = Janitor::new(config, Arc::new(client), rules, hook, Arc::new(notifier))?;
    let gate = shutdown::Gate::install();
    run_loop(&janitor, &gate, cli.once).await
}

async fn run_loop(janitor: &Janitor, gate: &shutdown::Gate, once: bool) -> Result<()> {
    let interval = Duration::from_secs(janitor.config().interval_secs);
    loop {
        match gate.guard(janitor.clean_up(gate.token())).await {
            Ok(summary) => debug!(run_id = %summary.run_id, "cleanup run finished"),
            Err(e) if once => return Err(e).context("cleanup run failed"),
            Err(e) => error!(error = %e, "cleanup run failed"),
        }
        if once || gate.token().is_cancelled() {
            break;
        }
        tokio::select! {
            _ = gate.token().cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("kube-janitor stopped");
    Ok(())
}
