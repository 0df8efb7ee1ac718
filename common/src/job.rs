use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Etapa global del job. Sólo avanza: Map -> Reduce -> Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Map,
    Reduce,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub queued: u32,
    pub running: u32,
    pub complete: u32,
}

impl TaskCounts {
    pub fn total(&self) -> u32 {
        self.queued + self.running + self.complete
    }
}

/// Foto del estado del job que expone el master en GET /api/v1/job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub phase: Phase,
    pub done: bool,

    /// -------- Métricas del job --------
    pub map_tasks: TaskCounts,
    pub reduce_tasks: TaskCounts,
    pub ready_queue_len: usize,
    pub retry_queue_len: usize,
}
