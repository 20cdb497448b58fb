//! Registro de un assessment de compliance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Una instancia de assessment por tenant/aplicación.
///
/// `locked` es el único primitivo de exclusión: se marca mientras una tarea de
/// generación o mutación es dueña del assessment y lo limpia el consumer (o la
/// compensación de cancelación / el sweeper). `deleted` es un soft-delete: las
/// filas nunca se borran físicamente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: i32,
    pub title: String,
    pub tenant_id: String,
    pub app_id: i64,
    pub frameworks: Vec<i64>,
    pub template_id: i32,
    /// Tipo de documento heredado del template ("word", "excel"), si aplica.
    pub kind: Option<String>,
    pub locked: bool,
    pub deleted: bool,
    /// Ubicación del archivo generado en object storage.
    pub location: Option<String>,
    /// Puntero de staging del reemplazo en dos fases: se promueve a
    /// `location` sólo cuando el assessment no está bloqueado.
    pub temp_location: Option<String>,
    pub created_by: Uuid,
    pub created_on: DateTime<Utc>,
    pub updated_by: Uuid,
    pub updated_on: DateTime<Utc>,
}
