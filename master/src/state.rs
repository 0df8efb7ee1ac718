// master/src/state.rs

use chrono::{DateTime, Utc};
use common::{Task, TaskCounts, TaskIdent, TaskKind, TaskMetadata, TaskPayload, TaskStatus};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};
use tracing::debug;

use crate::coordinator::Coordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/* ---------------- entrada del registro ---------------- */

#[derive(Debug, Clone, Copy)]
struct EntryState {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
}

/// Una tarea registrada. La identidad y el payload no cambian nunca;
/// estado y timestamp sólo se tocan a través de estos métodos.
#[derive(Debug)]
pub struct TaskEntry {
    ident: TaskIdent,
    payload: TaskPayload,
    state: Mutex<EntryState>,
}

impl TaskEntry {
    pub fn new(ident: TaskIdent, payload: TaskPayload) -> Self {
        Self {
            ident,
            payload,
            state: Mutex::new(EntryState {
                status: TaskStatus::Queued,
                started_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ident(&self) -> TaskIdent {
        self.ident
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    /// Vuelve a Queued. Una tarea completa no retrocede.
    pub fn mark_queued(&self) -> bool {
        let mut st = self.lock();
        if st.status == TaskStatus::Complete {
            return false;
        }
        st.status = TaskStatus::Queued;
        true
    }

    /// Queued -> Running con timestamp de despacho.
    pub fn mark_running(&self, now: DateTime<Utc>) -> bool {
        let mut st = self.lock();
        if st.status != TaskStatus::Queued {
            return false;
        }
        st.status = TaskStatus::Running;
        st.started_at = Some(now);
        true
    }

    /// Marca Complete y devuelve el estado anterior.
    pub fn mark_complete(&self) -> TaskStatus {
        let mut st = self.lock();
        let prev = st.status;
        st.status = TaskStatus::Complete;
        prev
    }

    /// Running y vencida -> Queued, todo bajo el mismo lock.
    pub fn expire(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let mut st = self.lock();
        if st.status != TaskStatus::Running {
            return false;
        }
        let expired = st
            .started_at
            .and_then(|start| (now - start).to_std().ok())
            .map(|elapsed| elapsed >= timeout)
            .unwrap_or(false);
        if expired {
            st.status = TaskStatus::Queued;
        }
        expired
    }

    /// Foto de la tarea para mandarla por la red.
    pub fn to_task(&self, job_id: &str) -> Task {
        let st = *self.lock();
        Task {
            meta: TaskMetadata {
                job_id: job_id.to_string(),
                ident: self.ident,
                status: st.status,
                started_at: st.started_at,
            },
            payload: self.payload.clone(),
        }
    }
}

/* ---------------- registro de tareas ---------------- */

/// TaskIdent -> tarea. Las entradas se crean una vez y nunca se borran.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<TaskIdent, Arc<TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ident: &TaskIdent) -> Option<Arc<TaskEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(ident).cloned()
    }

    pub fn set(&self, entry: Arc<TaskEntry>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.ident(), entry);
    }

    pub fn set_all<I>(&self, new_entries: I)
    where
        I: IntoIterator<Item = Arc<TaskEntry>>,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in new_entries {
            entries.insert(entry.ident(), entry);
        }
    }

    /// Recorre las entradas bajo el lock de lectura. El visitante no debe
    /// registrar ni reencolar tareas.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&TaskEntry),
    {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            visit(entry);
        }
    }

    /// Copia de las entradas para poder mutarlas sin tener el lock tomado.
    pub fn snapshot(&self) -> Vec<Arc<TaskEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().cloned().collect()
    }

    pub fn all_complete(&self, kind: TaskKind) -> bool {
        let mut complete = true;
        self.for_each(|entry| {
            if entry.ident().kind == kind && entry.status() != TaskStatus::Complete {
                complete = false;
            }
        });
        complete
    }

    pub fn counts(&self, kind: TaskKind) -> TaskCounts {
        let mut counts = TaskCounts::default();
        self.for_each(|entry| {
            if entry.ident().kind != kind {
                return;
            }
            match entry.status() {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Complete => counts.complete += 1,
            }
        });
        counts
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/* ---------------- colas ---------------- */

/// Cola FIFO de tareas despachables (hay una normal y una de reintentos).
#[derive(Debug)]
pub struct TaskQueue {
    name: &'static str,
    tasks: Mutex<VecDeque<Arc<TaskEntry>>>,
}

impl TaskQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<TaskEntry>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marca la tarea como Queued y la pone al final.
    pub fn enqueue(&self, entry: Arc<TaskEntry>) -> bool {
        if !entry.mark_queued() {
            return false;
        }
        self.lock().push_back(entry);
        true
    }

    /// Encola sólo si la tarea sigue Running y ya venció su plazo.
    pub fn requeue_expired(&self, entry: Arc<TaskEntry>, now: DateTime<Utc>, timeout: Duration) -> bool {
        if !entry.expire(now, timeout) {
            return false;
        }
        self.lock().push_back(entry);
        true
    }

    /// Saca la primera tarea que siga Queued, la marca Running y le pone
    /// `started_at = now`. Las que se completaron mientras esperaban en la
    /// cola se descartan.
    pub fn dequeue(&self, now: DateTime<Utc>) -> Option<Arc<TaskEntry>> {
        loop {
            let entry = self.lock().pop_front()?;
            if entry.mark_running(now) {
                return Some(entry);
            }
            debug!(
                "cola {}: descartando {} (estado {:?})",
                self.name,
                entry.ident(),
                entry.status()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
