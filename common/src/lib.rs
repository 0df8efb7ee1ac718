pub mod engine;
pub mod indexer;
pub mod job;
pub mod protocol;
pub mod task;
pub mod wordcount;

use std::time::Duration;

pub use engine::{App, KeyValue};
pub use job::{JobId, JobStatus, Phase, TaskCounts};
pub use protocol::{
    DispatchTaskRequest, DispatchTaskResponse, ErrorResponse, FetchStatus,
    MarkTaskCompleteRequest, MarkTaskCompleteResponse,
};
pub use task::{Task, TaskIdent, TaskKind, TaskMetadata, TaskPayload, TaskStatus};

/* --------- Contrato de tiempos compartido entre master y workers --------- */

/// Plazo máximo de una tarea desde que el master la despacha.
/// El master la reasigna al vencer; el worker la abandona al vencer.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Cada cuánto revisa el master las tareas vencidas.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Cuánto tiempo le queda a una tarea despachada en `started_at`, visto en `now`.
/// Cero si ya venció.
pub fn remaining_deadline(
    started_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
    timeout: Duration,
) -> Duration {
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    timeout.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn remaining_deadline_descuenta_lo_transcurrido() {
        let start = Utc::now();
        let now = start + chrono::Duration::seconds(4);
        assert_eq!(
            remaining_deadline(start, now, TASK_TIMEOUT),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn remaining_deadline_vencido_es_cero() {
        let start = Utc::now();
        let now = start + chrono::Duration::seconds(30);
        assert_eq!(remaining_deadline(start, now, TASK_TIMEOUT), Duration::ZERO);
    }

    #[test]
    fn remaining_deadline_con_reloj_atrasado_da_plazo_completo() {
        // started_at en el futuro (reloj del worker atrasado): no se descuenta nada
        let now = Utc::now();
        let start = now + chrono::Duration::seconds(2);
        assert_eq!(remaining_deadline(start, now, TASK_TIMEOUT), TASK_TIMEOUT);
    }
}
