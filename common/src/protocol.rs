use serde::{Deserialize, Serialize};

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStatus {
    /// Hay tarea en la respuesta
    Available,
    /// Todo lo pendiente está corriendo en otro worker, volver a preguntar
    NotReady,
    /// El job terminó
    NoMoreTasks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTaskRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTaskResponse {
    pub fetch_status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl DispatchTaskResponse {
    pub fn available(task: Task) -> Self {
        Self {
            fetch_status: FetchStatus::Available,
            task: Some(task),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            fetch_status: FetchStatus::NotReady,
            task: None,
        }
    }

    pub fn no_more_tasks() -> Self {
        Self {
            fetch_status: FetchStatus::NoMoreTasks,
            task: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkTaskCompleteRequest {
    #[serde(default)]
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkTaskCompleteResponse {}

/// Cuerpo de error que devuelve el master cuando rechaza una llamada
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
