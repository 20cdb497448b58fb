//! Filas vivas e históricas del documento: outline actual, secciones actuales
//! y sus logs append-only.
//!
//! Invariantes (ver también los commits atómicos en assess-core):
//! - `content_hash == hash(content)` tras cada mutación commiteada.
//! - Las versiones son monótonas; el historial sólo se agrega, nunca se
//!   reescribe (revertir también agrega).
//! - Cada `SectionHistory.history_ref` apunta a la fila de `OutlineHistory`
//!   creada en la misma transacción, lo que hace mutuamente dereferenciables
//!   outline-version N y section-version N.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::outline::OutlineNode;

/// Fila viva del outline: exactamente una por (assessment, aplicación).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineRecord {
    pub id: i64,
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    /// Contador global por assessment (no por sección).
    pub version: i32,
    pub outline_hash: Option<String>,
    pub tree: Vec<OutlineNode>,
    pub created_by: Uuid,
    pub created_on: DateTime<Utc>,
    pub deleted: bool,
}

/// Snapshot completo de un estado *anterior* del outline. Se escribe
/// exactamente una vez por mutación, inmediatamente antes de avanzar la fila
/// viva.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineHistoryRecord {
    pub id: i64,
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    /// Versión del outline en el momento del snapshot (pre-incremento).
    pub version: i32,
    pub outline_hash: Option<String>,
    pub tree: Vec<OutlineNode>,
    pub created_by: Uuid,
    pub created_on: DateTime<Utc>,
    pub deleted: bool,
}

/// Fila viva de una sección: una por (assessment, section_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    pub section_id: String,
    pub title: String,
    pub version: i32,
    pub content: Value,
    pub content_hash: Option<String>,
    /// Versión a la que el usuario revirtió explícitamente, si alguna.
    pub copy_of: Option<i32>,
    pub created_by: Uuid,
    pub created_on: DateTime<Utc>,
    pub deleted: bool,
}

/// Estado anterior de una sección, correlacionado con el snapshot de outline
/// tomado en la misma transacción vía `history_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionHistory {
    pub id: i64,
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    pub section_id: String,
    pub title: String,
    pub version: i32,
    pub content: Value,
    pub content_hash: Option<String>,
    pub copy_of: Option<i32>,
    /// Id de la fila de OutlineHistory creada en la misma transacción.
    pub history_ref: i64,
    pub created_by: Uuid,
    pub created_on: DateTime<Utc>,
    pub deleted: bool,
}
