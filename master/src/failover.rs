use chrono::{DateTime, Utc};
use common::{TaskIdent, TaskKind};
use std::{sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::coordinator::Coordinator;

/// Loop del supervisor de timeouts:
/// - cada `tick` revisa todas las tareas Running
/// - las que pasaron el plazo van a la cola de reintentos
/// - termina cuando el job termina
pub async fn run_timeout_supervisor(coordinator: Arc<Coordinator>, tick: Duration) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut done = coordinator.subscribe_done();

    loop {
        if *done.borrow_and_update() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&coordinator, Utc::now());
            }
            changed = done.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("supervisor de timeouts detenido (job {})", coordinator.job_id());
}

/// Una pasada de chequeo. Trabaja sobre una copia del registro para no
/// tener el lock de lectura tomado mientras encola. Las vencidas entran a
/// la cola de reintentos en orden (maps primero, por índice) y se
/// devuelven en ese mismo orden.
pub fn sweep_once(coordinator: &Coordinator, now: DateTime<Utc>) -> Vec<TaskIdent> {
    let timeout = coordinator.task_timeout();
    let mut requeued = Vec::new();

    let mut entries = coordinator.registry().snapshot();
    entries.sort_by_key(|entry| {
        let ident = entry.ident();
        (ident.kind == TaskKind::Reduce, ident.index)
    });

    for entry in entries {
        let ident = entry.ident();
        let started_at = entry.started_at();
        if coordinator
            .retry_queue()
            .requeue_expired(entry, now, timeout)
        {
            warn!(
                "{} venció (despachada en {:?}), pasa a la cola de reintentos",
                ident, started_at
            );
            requeued.push(ident);
        }
    }

    requeued
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FetchStatus, TaskStatus};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn coordinator(n_files: usize) -> Coordinator {
        let files = (0..n_files).map(|i| format!("f{}.txt", i)).collect();
        Coordinator::new("job".to_string(), files, 2, TIMEOUT)
    }

    #[test]
    fn tarea_abandonada_vuelve_a_despacharse_antes_que_las_nuevas() {
        let c = coordinator(3);
        let start = Utc::now();

        let m0 = c.dispatch_at(start).task.unwrap();
        assert_eq!(m0.ident(), TaskIdent::map(0));

        // antes del plazo no pasa nada
        assert!(sweep_once(&c, start + chrono::Duration::seconds(9)).is_empty());

        let requeued = sweep_once(&c, start + chrono::Duration::seconds(10));
        assert_eq!(requeued, vec![TaskIdent::map(0)]);
        assert_eq!(c.status().retry_queue_len, 1);
        assert_eq!(
            c.registry().get(&TaskIdent::map(0)).unwrap().status(),
            TaskStatus::Queued
        );

        // se prefiere a map-1 y map-2, que nunca se tocaron
        let again = c.dispatch().task.unwrap();
        assert_eq!(again.ident(), TaskIdent::map(0));
        assert!(again.meta.started_at.unwrap() >= start);
    }

    #[test]
    fn sweep_no_reencola_dos_veces_ni_toca_completas() {
        let c = coordinator(2);
        let start = Utc::now();
        let m0 = c.dispatch_at(start).task.unwrap();
        let m1 = c.dispatch_at(start).task.unwrap();
        c.mark_complete(&m1).unwrap();

        let later = start + chrono::Duration::seconds(30);
        assert_eq!(sweep_once(&c, later), vec![m0.ident()]);
        // ya está Queued en reintentos: otra pasada no la duplica
        assert!(sweep_once(&c, later).is_empty());
        assert_eq!(c.status().retry_queue_len, 1);
        assert_eq!(
            c.registry().get(&m1.ident()).unwrap().status(),
            TaskStatus::Complete
        );
    }

    #[test]
    fn sweep_reencola_en_el_orden_que_devuelve() {
        let c = coordinator(6);
        let start = Utc::now();
        for _ in 0..6 {
            c.dispatch_at(start).task.unwrap();
        }

        let requeued = sweep_once(&c, start + chrono::Duration::seconds(10));
        let expected: Vec<TaskIdent> = (0..6).map(TaskIdent::map).collect();
        assert_eq!(requeued, expected);

        // la cola de reintentos entrega exactamente en ese orden
        let served: Vec<TaskIdent> = (0..6)
            .map(|_| c.dispatch().task.unwrap().ident())
            .collect();
        assert_eq!(served, requeued);
    }

    #[tokio::test]
    async fn supervisor_se_detiene_cuando_el_job_termina() {
        let c = Arc::new(coordinator(1));
        let handle = tokio::spawn(run_timeout_supervisor(
            c.clone(),
            Duration::from_millis(10),
        ));

        let m0 = c.dispatch().task.unwrap();
        c.mark_complete(&m0).unwrap();
        for _ in 0..2 {
            let r = c.dispatch().task.unwrap();
            c.mark_complete(&r).unwrap();
        }
        assert!(c.is_job_done());
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NoMoreTasks);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("el supervisor siguió corriendo")
            .unwrap();
    }

    #[tokio::test]
    async fn supervisor_recupera_tarea_vencida() {
        // plazo cortito para no esperar 10s
        let c = Arc::new(Coordinator::new(
            "job".to_string(),
            vec!["a.txt".to_string()],
            1,
            Duration::from_millis(50),
        ));
        let handle = tokio::spawn(run_timeout_supervisor(
            c.clone(),
            Duration::from_millis(10),
        ));

        let m0 = c.dispatch().task.unwrap();
        assert_eq!(c.dispatch().fetch_status, FetchStatus::NotReady);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(c.status().retry_queue_len, 1);

        let again = c.dispatch().task.unwrap();
        assert_eq!(again.ident(), m0.ident());

        handle.abort();
    }
}
