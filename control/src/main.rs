use anyhow::Result;
use control::haproxy::{HaproxyPublisher, Reload};
use control::k8s;
use control::store::Store;
use control::sync::Reconciler;
use control::ControllerConfig;
use kube::Client;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// PORTTI - Kubernetes ingress controller for HAProxy
///
/// Watches namespaces, services, pods, ingresses, the controller ConfigMap
/// and secrets; every change regenerates and validates an HAProxy
/// configuration and signals the proxy-control collaborator to reload.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("PORTTI control plane starting");

    let config = ControllerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let (period_tx, period_rx) = watch::channel(config.sync_period);
    let (reload_tx, mut reload_rx) = mpsc::channel::<Reload>(1);

    let watchers = k8s::spawn_watchers(client, &config, event_tx.clone(), cancel.clone());
    tokio::spawn(k8s::tick(event_tx, period_rx, cancel.clone()));

    // Proxy-control collaborator seam: consumes validated configuration
    // paths and performs the atomic swap + reload.
    tokio::spawn(async move {
        while let Some(reload) = reload_rx.recv().await {
            info!("reload requested for {}", reload.path.display());
        }
    });

    let publisher = HaproxyPublisher::new(&config, reload_tx);
    let reconciler = Reconciler::new(
        Store::new(config.namespaces.clone()),
        event_rx,
        publisher,
        period_tx,
        config.clone(),
        cancel.clone(),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    reconciler.run().await;

    cancel.cancel();
    for watcher in watchers {
        let _ = watcher.await;
    }

    // Candidate configs are scoped to this run.
    if let Err(e) = std::fs::remove_dir_all(&config.config_dir) {
        info!("config dir cleanup skipped: {}", e);
    }

    Ok(())
}
