//! Constantes operativas del motor.

/// Ventana dentro de la cual una tarea PENDING/IN_PROCESS de assessment
/// bloquea la creación de otra para la misma aplicación (segundos).
pub const PENDING_TASK_VISIBILITY_SECS: i64 = 24 * 60 * 60;

/// Edad por defecto a partir de la cual el sweeper considera una tarea
/// activa como colgada.
pub const DEFAULT_STUCK_TASK_AGE_SECS: i64 = 24 * 60 * 60;

/// Versión inicial de outline y secciones recién sembradas.
pub const INITIAL_VERSION: i32 = 0;

/// `entity_type` usado por las tareas que frontean assessments.
pub const ENTITY_ASSESSMENT: &str = "assessment";
