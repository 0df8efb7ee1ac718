mod coordinator;
mod error;
mod failover;
mod handlers;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use common::{SUPERVISOR_TICK, TASK_TIMEOUT};
use glob::glob;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::coordinator::Coordinator;
use crate::state::AppState;

pub const DEFAULT_N_REDUCE: u32 = 10;

pub const DEFAULT_LINGER_SECS: u64 = TASK_TIMEOUT.as_secs() + SUPERVISOR_TICK.as_secs();

#[derive(Parser, Debug)]
#[command(name = "master")]
#[command(about = "Coordinador de un job Map/Reduce")]
struct Args {
    /// Archivos de entrada, uno por tarea map (acepta patrones glob)
    #[arg(value_name = "ENTRADAS")]
    inputs: Vec<String>,

    /// Cantidad de particiones reduce (al menos una)
    #[arg(
        long,
        default_value_t = DEFAULT_N_REDUCE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    n_reduce: u32,

    /// Dirección donde escucha el master
    #[arg(long, env = "MASTER_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directorio donde los workers escriben intermedios y salidas
    #[arg(long, env = "WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Segundos que sigue atendiendo después de terminar el job, para que
    /// los workers reciban NO_MORE_TASKS. Por defecto supera TASK_TIMEOUT: un worker
    /// con una tarea duplicada todavía puede estar corriendo.
    #[arg(long, default_value_t = DEFAULT_LINGER_SECS)]
    linger_secs: u64,
}

/// Expande los patrones de entrada en orden, sin repetir archivos.
fn expand_inputs(patterns: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let mut matched = 0;
        let mut paths: Vec<_> = glob(pattern)
            .with_context(|| format!("patrón de entrada inválido: {}", pattern))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            matched += 1;
            let path = path.to_string_lossy().to_string();
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }

        if matched == 0 {
            warn!("el patrón {} no encontró archivos", pattern);
        }
    }

    Ok(files)
}

/// Avisa si el directorio de trabajo ya tiene archivos `mr-*` de otra
/// corrida: los reduce leerían intermedios viejos como si fueran de este job.
fn warn_stale_outputs(work_dir: &Path) -> usize {
    let pattern = work_dir.join("mr-*");
    let stale = match glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).count(),
        Err(e) => {
            warn!("no se pudo revisar {}: {}", work_dir.display(), e);
            return 0;
        }
    };
    if stale > 0 {
        warn!(
            "{} tiene {} archivos mr-* de una corrida anterior; conviene limpiarlo antes de arrancar",
            work_dir.display(),
            stale
        );
    }
    stale
}

/// Termina cuando el job terminó (más el margen) o con ctrl-c.
async fn shutdown_signal(coordinator: Arc<Coordinator>, linger: Duration) {
    tokio::select! {
        _ = coordinator.wait_done() => {
            info!("job terminado, atendiendo {:?} más antes de cerrar", linger);
            tokio::time::sleep(linger).await;
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("no se pudo escuchar ctrl-c: {:?}", e);
                coordinator.wait_done().await;
                return;
            }
            warn!("ctrl-c recibido, cerrando el master");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let files = expand_inputs(&args.inputs)?;
    warn_stale_outputs(&args.work_dir);

    let job_id = uuid::Uuid::new_v4().to_string();
    let coordinator = Arc::new(Coordinator::new(
        job_id,
        files,
        args.n_reduce,
        TASK_TIMEOUT,
    ));

    // supervisor de timeouts en segundo plano
    let supervisor = tokio::spawn(failover::run_timeout_supervisor(
        coordinator.clone(),
        SUPERVISOR_TICK,
    ));

    // router HTTP
    let app = handlers::build_router(AppState {
        coordinator: coordinator.clone(),
    });

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", args.bind))?;
    info!(
        "master del job {} escuchando en {}",
        coordinator.job_id(),
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            coordinator.clone(),
            Duration::from_secs(args.linger_secs),
        ))
        .await?;

    supervisor.abort();

    let status = coordinator.status();
    if status.done {
        info!("job {} completo, master cerrado", status.job_id);
    } else {
        warn!(
            "master cerrado con el job {} sin terminar (fase {:?})",
            status.job_id, status.phase
        );
    }

    Ok(())
}
