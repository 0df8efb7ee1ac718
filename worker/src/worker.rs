use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use common::engine::{self, app_by_name};
use common::{
    remaining_deadline, App, DispatchTaskRequest, DispatchTaskResponse, ErrorResponse,
    FetchStatus, MarkTaskCompleteRequest, Task, TASK_TIMEOUT,
};
use reqwest::Client;
use std::{
    env,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Espera cuando el master dice que no hay tarea lista todavía.
pub const NOT_READY_DELAY: Duration = Duration::from_secs(1);

/// Espera antes de reintentar cuando falla la conexión con el master.
pub const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct WorkerConfig {
    pub master_url: String,
    pub work_dir: PathBuf,
    pub app: App,
    pub worker_name: String,
    pub not_ready_delay: Duration,
    pub retry_delay: Duration,
}

impl WorkerConfig {
    /// Lee la configuración de variables de entorno:
    /// - MASTER_URL (default http://localhost:8080)
    /// - WORK_DIR: donde van intermedios y salidas (default ".")
    /// - MR_APP: "wordcount" (default) o "indexer"
    pub fn from_env() -> Result<Self> {
        let master_url =
            env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let work_dir = PathBuf::from(env::var("WORK_DIR").unwrap_or_else(|_| ".".to_string()));

        let app_name = env::var("MR_APP").unwrap_or_else(|_| "wordcount".to_string());
        let app = app_by_name(&app_name).ok_or_else(|| anyhow!("MR_APP desconocida: {}", app_name))?;

        // Nombre de host (solo para info)
        let hostname = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(Self {
            master_url,
            work_dir,
            app,
            worker_name: format!("{}-{}", hostname, std::process::id()),
            not_ready_delay: NOT_READY_DELAY,
            retry_delay: TRANSPORT_RETRY_DELAY,
        })
    }
}

/* ---------------- cliente del protocolo ---------------- */

pub struct MasterClient {
    client: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn dispatch(&self) -> Result<DispatchTaskResponse> {
        let url = format!("{}/api/v1/tasks/dispatch", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&DispatchTaskRequest::default())
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn mark_complete(&self, task: &Task) -> Result<()> {
        let url = format!("{}/api/v1/tasks/complete", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&MarkTaskCompleteRequest {
                task: Some(task.clone()),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_default();
            bail!("el master rechazó el reporte ({}): {}", status, detail);
        }
        Ok(())
    }
}

/* ---------------- ejecución con plazo ---------------- */

#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    /// Se pasó el plazo; el master la va a reasignar
    Abandoned,
    /// Falló la lectura/escritura o la lógica de usuario
    Failed(String),
}

/// Ejecuta la tarea en un hilo bloqueante y la corre contra `deadline`.
/// Si el plazo vence primero, se levanta el flag de abandono para que el
/// hilo no publique sus archivos.
pub async fn execute_with_deadline(
    app: App,
    work_dir: &Path,
    task: &Task,
    deadline: Duration,
) -> TaskOutcome {
    let abandon = Arc::new(AtomicBool::new(false));

    let handle = {
        let abandon = abandon.clone();
        let work_dir = work_dir.to_path_buf();
        let task = task.clone();
        tokio::task::spawn_blocking(move || engine::execute_task(&app, &work_dir, &task, &abandon))
    };

    match tokio::time::timeout(deadline, handle).await {
        Err(_) => {
            abandon.store(true, Ordering::SeqCst);
            TaskOutcome::Abandoned
        }
        Ok(Ok(Ok(()))) => TaskOutcome::Completed,
        Ok(Ok(Err(e))) => TaskOutcome::Failed(format!("{:#}", e)),
        Ok(Err(e)) => TaskOutcome::Failed(format!("panic o join error: {:?}", e)),
    }
}

/// Plazo que le queda a la tarea según el timestamp de despacho del master.
fn deadline_for(task: &Task) -> Duration {
    match task.meta.started_at {
        Some(started_at) => remaining_deadline(started_at, Utc::now(), TASK_TIMEOUT),
        None => TASK_TIMEOUT,
    }
}

/* ---------------- loop principal ---------------- */

/// Loop principal del worker.
/// - Pide tareas al master.
/// - Ejecuta cada una contra el plazo que le queda.
/// - Reporta sólo las que terminan bien; el resto las recupera el master por timeout.
///
/// Devuelve cuántas tareas reportó como completas cuando el master dice
/// que no hay más.
pub async fn run(config: &WorkerConfig) -> Result<u64> {
    let master = MasterClient::new(&config.master_url);
    let mut completed: u64 = 0;

    loop {
        let resp = match master.dispatch().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    "no se pudo pedir tarea al master: {:#}. Reintento en {:?}",
                    e, config.retry_delay
                );
                sleep(config.retry_delay).await;
                continue;
            }
        };

        let task = match (resp.fetch_status, resp.task) {
            (FetchStatus::NoMoreTasks, _) => break,
            (FetchStatus::NotReady, _) => {
                debug!("no hay tarea lista, esperando {:?}", config.not_ready_delay);
                sleep(config.not_ready_delay).await;
                continue;
            }
            (FetchStatus::Available, Some(task)) => task,
            (FetchStatus::Available, None) => {
                warn!("el master dijo AVAILABLE pero no mandó tarea");
                sleep(config.not_ready_delay).await;
                continue;
            }
        };

        let ident = task.ident();
        let deadline = deadline_for(&task);
        if deadline.is_zero() {
            warn!("{} llegó con el plazo vencido, se descarta", ident);
            continue;
        }

        info!(
            "worker {} tiene {} (plazo {:?})",
            config.worker_name, ident, deadline
        );

        match execute_with_deadline(config.app, &config.work_dir, &task, deadline).await {
            TaskOutcome::Completed => match master.mark_complete(&task).await {
                Ok(()) => {
                    completed += 1;
                    info!("terminé {} y lo reporté al master", ident);
                }
                Err(e) => warn!("no se pudo reportar {}: {:#}", ident, e),
            },
            TaskOutcome::Abandoned => {
                warn!("{} superó el plazo de {:?}, se abandona", ident, deadline);
            }
            TaskOutcome::Failed(e) => {
                warn!("error procesando {}: {}", ident, e);
            }
        }
    }

    Ok(completed)
}
