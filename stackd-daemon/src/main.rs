use std::sync::Arc;
use tracing::{debug, info};

use stackd_core::backend::{BackendApiShim, BackendClient, LocalCluster};
use stackd_core::{Config, StackStore};
use stackd_daemon::reconciler::Manager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    stackd_core::observability::init()?;

    info!("stackd daemon starting");

    let config = Config::load()?;
    debug!(
        listen_port = config.listen_port,
        socket_path = %config.socket_path,
        commit_retries = config.commit_retries,
        "loaded configuration"
    );

    // Standalone deployment: in-memory stack storage and an in-memory
    // downstream; the surrounding tooling serves the stack CRUD API against
    // the same shim.
    let cluster = Arc::new(LocalCluster::new());
    let store = Arc::new(StackStore::new());
    let backend: Arc<dyn BackendClient> = Arc::new(BackendApiShim::new(cluster, store));

    let manager = Manager::new(backend).with_commit_retries(config.commit_retries);

    let run = manager.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = shutdown_signal() => {
            info!("shutting down");
            manager.stop();
            run.await?;
        }
    }

    info!("stackd daemon stopped");
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
