//! `yacht serve` - start the proxy and its control endpoint.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use yacht_audit::AuditLogger;
use yacht_core::YachtConfig;
use yacht_policy::PolicyStore;
use yacht_proxy::{YachtProxy, control};

pub async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!(config = %config_path.display(), "Loading configuration");

    let config = YachtConfig::load_with_context(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let policy = Arc::new(
        PolicyStore::new(&config.policy, config.policy_file.clone())
            .context("Failed to build policy")?,
    );
    let ruleset = policy.ruleset();
    tracing::info!(
        version = ruleset.version(),
        tables = ruleset.len(),
        default_posture = ?ruleset.default_posture(),
        moored = policy.is_moored(),
        source = ?config.policy_file,
        "Policy loaded"
    );

    let audit = Arc::new(AuditLogger::new(config.audit.clone()).context("Failed to open audit log")?);
    let proxy = Arc::new(YachtProxy::new(&config, policy, audit)?);

    #[cfg(unix)]
    proxy
        .reload_on_hangup()
        .context("Failed to install SIGHUP handler")?;

    let (stop_tx, stop_rx) = watch::channel(false);

    let control_task = if config.control.enabled {
        let proxy = proxy.clone();
        let listen_addr = config.control.listen_addr.clone();
        let mut stop_rx = stop_rx.clone();
        Some(tokio::spawn(async move {
            let stopped = async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = control::serve(proxy, &listen_addr, stopped).await {
                tracing::error!(error = %e, address = %listen_addr, "Control API stopped");
            }
        }))
    } else {
        tracing::info!("Control API disabled");
        None
    };
    drop(stop_rx);

    let result = proxy.run(shutdown_signal()).await;

    let _ = stop_tx.send(true);
    if let Some(task) = control_task {
        let _ = task.await;
    }

    result?;
    tracing::info!("Yacht agent stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
