use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorResponse, JobId, TaskIdent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Petición mal formada: no trae la tarea
    #[error("la petición no trae tarea")]
    MissingTask,

    #[error("la tarea {0} no está registrada en este coordinador")]
    UnknownTask(TaskIdent),

    #[error("la tarea {ident} pertenece al job {got}, este coordinador atiende el job {expected}")]
    ForeignJob {
        ident: TaskIdent,
        expected: JobId,
        got: JobId,
    },
}

impl CoordinatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::MissingTask => StatusCode::BAD_REQUEST,
            CoordinatorError::UnknownTask(_) | CoordinatorError::ForeignJob { .. } => {
                StatusCode::NOT_FOUND
            }
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
