use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, CustomResourceExt};
use kubetink_core::Stack;
use kubetink_kubehub::{get_kube_client, KubeClientOptions, KubeObjectClient};
use kubetink_pipeline::ConvergencePipeline;
use tokio_util::sync::CancellationToken;

mod controller;

use controller::{error_policy, reconcile, Context};

/// kubetink: converge the Tinkerbell stack for every Stack object
#[derive(Parser, Debug, Clone)]
#[command(name = "kubetink", version, about)]
struct OperatorConfig {
    /// Namespace watched for Stack objects
    #[arg(long, env = "KUBETINK_NAMESPACE", default_value = "tinkerbell")]
    namespace: String,

    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[arg(long, env = "KUBE_CONTEXT")]
    kube_context: Option<String>,

    /// Stacks reconciled concurrently
    #[arg(long, env = "KUBETINK_WORKERS", default_value_t = 2)]
    worker_count: u16,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "KUBETINK_METRICS_ADDR")]
    metrics_address: Option<SocketAddr>,

    /// Resync period after a successful reconcile
    #[arg(long, env = "KUBETINK_REQUEUE_SECS", default_value_t = 300)]
    requeue_secs: u64,

    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print the Stack CRD and exit
    #[arg(long)]
    crd: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = std::env::var("KUBETINK_LOG").unwrap_or_else(|_| default.to_string());
    let filter =
        tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(%addr, "Prometheus metrics exporter listening"),
        Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = OperatorConfig::parse();
    if cfg.crd {
        print!("{}", serde_yaml::to_string(&Stack::crd()).context("serializing CRD")?);
        return Ok(());
    }
    init_tracing(cfg.verbose);
    init_metrics(cfg.metrics_address);

    let opts = KubeClientOptions { kubeconfig: cfg.kubeconfig.clone(), context: cfg.kube_context.clone() };
    let client = get_kube_client(&opts).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested; cancelling in-flight reconciles");
            trigger.cancel();
        }
    });

    let ctx = Arc::new(Context {
        pipeline: ConvergencePipeline::new(Arc::new(KubeObjectClient::new(client.clone()))),
        shutdown,
        default_namespace: cfg.namespace.clone(),
        requeue: Duration::from_secs(cfg.requeue_secs),
    });

    let stacks: Api<Stack> = Api::namespaced(client, &cfg.namespace);
    tracing::info!(namespace = %cfg.namespace, workers = cfg.worker_count, "starting Stack controller");
    Controller::new(stacks, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(cfg.worker_count))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => tracing::debug!(stack = %obj.name, ?action, "reconciled"),
                Err(e) => tracing::debug!(error = %e, "controller event"),
            }
        })
        .await;

    tracing::info!("kubetink shutting down");
    Ok(())
}
