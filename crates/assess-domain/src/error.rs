// error.rs
use thiserror::Error;

/// Errores del dominio de assessments (sin I/O).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validación fallida: {0}")]
    Validation(String),

    #[error("Sección no encontrada en el outline: {0}")]
    SectionNotInOutline(String),

    #[error("Error de serialización: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Serialization(e.to_string())
    }
}
