use chrono::{DateTime, Utc};
use common::{
    DispatchTaskResponse, JobId, JobStatus, Phase, Task, TaskIdent, TaskKind, TaskPayload,
    TaskStatus,
};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::CoordinatorError;
use crate::state::{TaskEntry, TaskQueue, TaskRegistry};

/// Estado completo del scheduler para un job. Se construye una vez y los
/// handlers trabajan sobre un `Arc<Coordinator>`.
pub struct Coordinator {
    job_id: JobId,
    num_map: u32,
    num_reduce: u32,
    task_timeout: Duration,

    registry: TaskRegistry,
    // tareas nuevas, en orden de creación
    ready: TaskQueue,
    // tareas recuperadas por el supervisor; se sirven primero
    retry: TaskQueue,

    // serializa las decisiones de cambio de fase
    phase: Mutex<Phase>,
    // latch de job terminado: pasa a true una sola vez
    done: watch::Sender<bool>,
}

impl Coordinator {
    /// Registra y encola una tarea map por archivo de entrada.
    pub fn new(
        job_id: JobId,
        input_files: Vec<String>,
        num_reduce: u32,
        task_timeout: Duration,
    ) -> Self {
        let (done, _) = watch::channel(false);

        let coordinator = Self {
            job_id,
            num_map: input_files.len() as u32,
            num_reduce,
            task_timeout,
            registry: TaskRegistry::new(),
            ready: TaskQueue::new("ready"),
            retry: TaskQueue::new("retry"),
            phase: Mutex::new(Phase::Map),
            done,
        };

        for (i, input_path) in input_files.into_iter().enumerate() {
            let entry = Arc::new(TaskEntry::new(
                TaskIdent::map(i as u32),
                TaskPayload::Map {
                    input_path,
                    num_reduce,
                },
            ));
            coordinator.registry.set(entry.clone());
            coordinator.ready.enqueue(entry);
        }

        info!(
            "job {} creado: {} tareas map, {} particiones reduce",
            coordinator.job_id, coordinator.num_map, coordinator.num_reduce
        );

        // sin entradas no hay nada que esperar en la fase Map
        coordinator.advance_phase();
        coordinator
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub(crate) fn retry_queue(&self) -> &TaskQueue {
        &self.retry
    }

    /* ---------------- protocolo ---------------- */

    pub fn dispatch(&self) -> DispatchTaskResponse {
        self.dispatch_at(Utc::now())
    }

    /// Entrega la siguiente tarea: primero la cola de reintentos, después
    /// la normal.
    pub fn dispatch_at(&self, now: DateTime<Utc>) -> DispatchTaskResponse {
        if self.phase() == Phase::Complete {
            return DispatchTaskResponse::no_more_tasks();
        }

        if let Some(entry) = self.retry.dequeue(now) {
            info!("reasignando {} desde la cola de reintentos", entry.ident());
            return DispatchTaskResponse::available(entry.to_task(&self.job_id));
        }

        if let Some(entry) = self.ready.dequeue(now) {
            debug!("asignando {}", entry.ident());
            return DispatchTaskResponse::available(entry.to_task(&self.job_id));
        }

        DispatchTaskResponse::not_ready()
    }

    /// Un worker reporta que terminó una tarea.
    pub fn mark_complete(&self, task: &Task) -> Result<(), CoordinatorError> {
        let ident = task.ident();

        if task.meta.job_id != self.job_id {
            warn!(
                "reporte de {} del job {}, pero este coordinador es del job {}",
                ident, task.meta.job_id, self.job_id
            );
            return Err(CoordinatorError::ForeignJob {
                ident,
                expected: self.job_id.clone(),
                got: task.meta.job_id.clone(),
            });
        }

        let Some(entry) = self.registry.get(&ident) else {
            error!("{} no está registrada en el coordinador, algo anda mal", ident);
            return Err(CoordinatorError::UnknownTask(ident));
        };

        match entry.mark_complete() {
            TaskStatus::Complete => {
                debug!("{} ya estaba completa, reporte duplicado", ident);
            }
            prev => {
                info!("{} completada (antes {:?})", ident, prev);
                self.advance_phase();
            }
        }

        Ok(())
    }

    pub fn is_job_done(&self) -> bool {
        *self.done.borrow()
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Espera a que el job termine.
    pub async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id.clone(),
            phase: self.phase(),
            done: self.is_job_done(),
            map_tasks: self.registry.counts(TaskKind::Map),
            reduce_tasks: self.registry.counts(TaskKind::Reduce),
            ready_queue_len: self.ready.len(),
            retry_queue_len: self.retry.len(),
        }
    }

    /* ---------------- máquina de fases ---------------- */

    /// Revisa si la fase actual terminó y avanza. Con cero tareas en una
    /// fase avanza de corrido.
    fn advance_phase(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            match *phase {
                Phase::Map => {
                    // la lectura del registro se suelta antes de tomar la escritura
                    if !self.registry.all_complete(TaskKind::Map) {
                        return;
                    }

                    let reduce_tasks: Vec<Arc<TaskEntry>> = (0..self.num_reduce)
                        .map(|partition| {
                            Arc::new(TaskEntry::new(
                                TaskIdent::reduce(partition),
                                TaskPayload::Reduce {
                                    partition,
                                    num_map: self.num_map,
                                },
                            ))
                        })
                        .collect();

                    self.registry.set_all(reduce_tasks.iter().cloned());
                    for entry in reduce_tasks {
                        self.ready.enqueue(entry);
                    }

                    *phase = Phase::Reduce;
                    info!(
                        "fase Map terminada, {} tareas reduce encoladas ({} tareas registradas)",
                        self.num_reduce,
                        self.registry.len()
                    );
                }
                Phase::Reduce => {
                    if !self.registry.all_complete(TaskKind::Reduce) {
                        return;
                    }
                    *phase = Phase::Complete;
                    self.done.send_replace(true);
                    info!("todas las tareas completas, job {} terminado", self.job_id);
                    return;
                }
                Phase::Complete => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FetchStatus;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pg-{}.txt", i)).collect()
    }

    fn new_coordinator(n_files: usize, n_reduce: u32) -> Coordinator {
        Coordinator::new("job-test".to_string(), files(n_files), n_reduce, TIMEOUT)
    }

    fn take(c: &Coordinator) -> Task {
        let resp = c.dispatch();
        assert_eq!(resp.fetch_status, FetchStatus::Available);
        resp.task.unwrap()
    }

    #[test]
    fn escenario_completo_dos_archivos_tres_particiones() {
        let c = new_coordinator(2, 3);
        assert_eq!(c.phase(), Phase::Map);

        // FIFO: primero el archivo 0, después el 1
        let m0 = take(&c);
        let m1 = take(&c);
        assert_eq!(m0.ident(), TaskIdent::map(0));
        assert_eq!(m1.ident(), TaskIdent::map(1));
        assert_eq!(
            m0.payload,
            TaskPayload::Map {
                input_path: "pg-0.txt".to_string(),
                num_reduce: 3
            }
        );
        assert_eq!(m0.meta.status, TaskStatus::Running);
        assert!(m0.meta.started_at.is_some());

        // todo corriendo en otro lado
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NotReady);

        c.mark_complete(&m0).unwrap();
        // todavía no hay reduce
        assert!(c.registry().get(&TaskIdent::reduce(0)).is_none());
        assert_eq!(c.phase(), Phase::Map);

        c.mark_complete(&m1).unwrap();
        assert_eq!(c.phase(), Phase::Reduce);
        assert_eq!(c.registry().len(), 5);

        let reduces: Vec<Task> = (0..3).map(|_| take(&c)).collect();
        let idents: Vec<TaskIdent> = reduces.iter().map(|t| t.ident()).collect();
        assert_eq!(
            idents,
            vec![TaskIdent::reduce(0), TaskIdent::reduce(1), TaskIdent::reduce(2)]
        );
        assert_eq!(
            reduces[1].payload,
            TaskPayload::Reduce {
                partition: 1,
                num_map: 2
            }
        );
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NotReady);

        for t in &reduces {
            assert!(!c.is_job_done());
            c.mark_complete(t).unwrap();
        }

        assert!(c.is_job_done());
        assert_eq!(c.phase(), Phase::Complete);
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NoMoreTasks);
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NoMoreTasks);
    }

    #[test]
    fn cola_de_reintentos_tiene_prioridad() {
        let c = new_coordinator(2, 1);
        let start = Utc::now();

        let m0 = c.dispatch_at(start).task.unwrap();
        assert_eq!(m0.ident(), TaskIdent::map(0));

        // m0 vence y pasa a reintentos; map-1 sigue intacta en la cola normal
        let entry = c.registry().get(&TaskIdent::map(0)).unwrap();
        assert!(c.retry_queue().requeue_expired(
            entry,
            start + chrono::Duration::seconds(10),
            TIMEOUT
        ));

        let next = c.dispatch().task.unwrap();
        assert_eq!(next.ident(), TaskIdent::map(0));
        assert_eq!(c.dispatch().task.unwrap().ident(), TaskIdent::map(1));
    }

    #[test]
    fn reporte_duplicado_es_idempotente_y_no_duplica_reduce() {
        let c = new_coordinator(1, 2);
        let m0 = take(&c);

        c.mark_complete(&m0).unwrap();
        c.mark_complete(&m0).unwrap();

        assert_eq!(c.phase(), Phase::Reduce);
        assert_eq!(c.status().reduce_tasks.total(), 2);
        assert_eq!(c.status().ready_queue_len, 2);
        assert_eq!(
            c.registry().get(&TaskIdent::map(0)).unwrap().status(),
            TaskStatus::Complete
        );
    }

    #[test]
    fn reporte_tardio_de_tarea_reencolada_no_se_vuelve_a_despachar() {
        let c = new_coordinator(1, 1);
        let start = Utc::now();
        let m0 = c.dispatch_at(start).task.unwrap();

        let entry = c.registry().get(&m0.ident()).unwrap();
        c.retry_queue()
            .requeue_expired(entry, start + chrono::Duration::seconds(11), TIMEOUT);

        // el worker lento termina igual
        c.mark_complete(&m0).unwrap();
        assert_eq!(c.phase(), Phase::Reduce);

        // la entrada vieja de reintentos se descarta, sale el reduce
        let next = take(&c);
        assert_eq!(next.ident(), TaskIdent::reduce(0));
    }

    #[test]
    fn sin_entradas_salta_directo_a_reduce() {
        let c = new_coordinator(0, 2);
        assert_eq!(c.phase(), Phase::Reduce);

        let r0 = take(&c);
        assert_eq!(
            r0.payload,
            TaskPayload::Reduce {
                partition: 0,
                num_map: 0
            }
        );
        let r1 = take(&c);
        c.mark_complete(&r0).unwrap();
        c.mark_complete(&r1).unwrap();
        assert!(c.is_job_done());
    }

    #[test]
    fn sin_entradas_ni_particiones_termina_al_crearse() {
        let c = new_coordinator(0, 0);
        assert!(c.is_job_done());
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NoMoreTasks);
    }

    #[test]
    fn tarea_desconocida_da_error_sin_tocar_el_registro() {
        let c = new_coordinator(1, 1);
        let mut fake = take(&c);
        fake.meta.ident = TaskIdent::map(42);

        let err = c.mark_complete(&fake).unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownTask(id) if id == TaskIdent::map(42)));
        assert_eq!(c.registry().len(), 1);
        assert_eq!(c.phase(), Phase::Map);
    }

    #[test]
    fn tarea_de_otro_job_se_rechaza() {
        let c = new_coordinator(1, 1);
        let mut other = take(&c);
        other.meta.job_id = "otro-job".to_string();

        let err = c.mark_complete(&other).unwrap_err();
        assert!(matches!(err, CoordinatorError::ForeignJob { .. }));
        assert_eq!(
            c.registry().get(&TaskIdent::map(0)).unwrap().status(),
            TaskStatus::Running
        );
    }

    #[test]
    fn reduce_con_mismo_indice_que_map_no_se_confunde() {
        let c = new_coordinator(1, 1);
        let m0 = take(&c);

        // un reduce-0 antes de tiempo no existe todavía
        let mut early = m0.clone();
        early.meta.ident = TaskIdent::reduce(0);
        assert!(c.mark_complete(&early).is_err());
        assert_eq!(c.phase(), Phase::Map);

        c.mark_complete(&m0).unwrap();
        assert_eq!(c.phase(), Phase::Reduce);
    }

    #[tokio::test]
    async fn wait_done_despierta_al_terminar() {
        let c = Arc::new(new_coordinator(1, 0));
        let m0 = take(&c);

        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait_done().await })
        };

        c.mark_complete(&m0).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_done no despertó")
            .unwrap();
        assert!(c.is_job_done());
    }
}
