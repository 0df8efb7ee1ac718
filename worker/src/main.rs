mod worker;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::worker::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    info!(
        "worker {} usando app {} contra {} (work_dir={})",
        config.worker_name,
        config.app.name,
        config.master_url,
        config.work_dir.display()
    );

    let completed = worker::run(&config).await?;
    info!(
        "worker {} termina: no hay más tareas ({} completadas)",
        config.worker_name, completed
    );
    Ok(())
}
