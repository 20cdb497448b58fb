//! Errores del motor. Las variantes mapean a las clases de fallo que el
//! borde HTTP del sistema original distinguía (400/403/404/409/5xx).

use assess_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validación: {0}")]
    Validation(String),
    #[error("prohibido: {0}")]
    Forbidden(String),
    #[error("no encontrado: {0}")]
    NotFound(String),
    #[error("conflicto: {0}")]
    Conflict(String),
    #[error("infraestructura: {0}")]
    Infrastructure(String),
}

impl EngineError {
    /// Un error que reintentar no va a arreglar.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, EngineError::Infrastructure(_))
    }
}

impl From<DomainError> for EngineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::SectionNotInOutline(id) => {
                EngineError::NotFound(format!("sección '{id}' fuera del outline"))
            }
            DomainError::Validation(msg) => EngineError::Validation(msg),
            DomainError::Serialization(msg) => EngineError::Infrastructure(msg),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Infrastructure(e.to_string())
    }
}
