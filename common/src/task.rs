use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Map,
    Reduce,
}

/// Identidad de una tarea dentro del job: (tipo, índice).
/// Un Map 0 y un Reduce 0 son tareas distintas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdent {
    pub kind: TaskKind,
    pub index: u32,
}

impl TaskIdent {
    pub fn map(index: u32) -> Self {
        Self {
            kind: TaskKind::Map,
            index,
        }
    }

    pub fn reduce(index: u32) -> Self {
        Self {
            kind: TaskKind::Reduce,
            index,
        }
    }
}

impl std::fmt::Display for TaskIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TaskKind::Map => write!(f, "map-{}", self.index),
            TaskKind::Reduce => write!(f, "reduce-{}", self.index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub job_id: JobId,
    pub ident: TaskIdent,
    pub status: TaskStatus,
    /// Momento en que el master entregó la tarea. None mientras nunca se despachó.
    pub started_at: Option<DateTime<Utc>>,
}

/// Datos propios de cada tipo de tarea. El tag `kind` viaja explícito en el JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Map {
        /// Ruta del archivo de entrada
        input_path: String,
        /// Cantidad de particiones de reduce
        num_reduce: u32,
    },
    Reduce {
        partition: u32,
        /// Cantidad de tareas map cuyos intermedios hay que leer
        num_map: u32,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Map { .. } => TaskKind::Map,
            TaskPayload::Reduce { .. } => TaskKind::Reduce,
        }
    }
}

/// Tarea tal como viaja entre master y workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub meta: TaskMetadata,
    pub payload: TaskPayload,
}

impl Task {
    pub fn ident(&self) -> TaskIdent {
        self.meta.ident
    }
}
