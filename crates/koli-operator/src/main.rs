//! Koli Operator - controllers for the Koli application platform

use clap::Parser;
use tokio_util::sync::CancellationToken;

use koli_common::kube_utils::create_client;
use koli_common::telemetry::init_telemetry;
use koli_operator::config::Cli;
use koli_operator::controller_runner::{build_controllers, Informers};
use koli_operator::startup::{crd_manifests, ensure_crds_established, shutdown_on_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let yaml = crd_manifests()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        print!("{yaml}");
        return Ok(());
    }

    init_telemetry(cli.telemetry_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = cli.operator_config();
    tracing::info!(
        default_domain = config.default_domain.as_deref().unwrap_or(""),
        workers = config.workers,
        "Starting Koli operator"
    );

    let client = create_client(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_established(&client)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to provision CRDs: {}", e))?;

    let shutdown = CancellationToken::new();
    shutdown_on_signal(shutdown.clone());

    let informers = Informers::new();
    let watchers: Vec<_> = informers
        .build_watchers(&client, &shutdown)
        .into_iter()
        .map(tokio::spawn)
        .collect();

    tracing::info!("Starting controllers");
    futures::future::join_all(build_controllers(&client, &informers, &config, &shutdown)).await;

    // Informers stop on the same token; wait so the last events are applied.
    for watcher in futures::future::join_all(watchers).await {
        if let Err(e) = watcher {
            tracing::warn!(error = %e, "Informer task ended abnormally");
        }
    }

    tracing::info!("Koli operator shut down");
    Ok(())
}
