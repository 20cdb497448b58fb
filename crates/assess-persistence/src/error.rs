//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas, y éstas a los
//! errores del motor.

use assess_core::EngineError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("stale row: {0}")]
    StaleRow(String),
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => {
                    Self::ForeignKeyViolation(info.message().to_string())
                }
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Unknown(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("diesel: {other:?}")),
        }
    }
}

impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => EngineError::NotFound("fila no encontrada".into()),
            PersistenceError::UniqueViolation(m)
            | PersistenceError::CheckViolation(m)
            | PersistenceError::ForeignKeyViolation(m)
            | PersistenceError::StaleRow(m) => EngineError::Conflict(m),
            other => EngineError::Infrastructure(other.to_string()),
        }
    }
}
