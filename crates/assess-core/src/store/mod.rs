//! Traits de persistencia del motor y su implementación en memoria.
//!
//! Los commits compuestos (`SectionCommit`, `ReversionCommit`) existen para
//! que cada backend sea dueño de la atomicidad: historial y fila viva avanzan
//! en la misma transacción o no avanzan. El orden es siempre snapshot de
//! outline primero, snapshots de sección después (con `history_ref` apuntando
//! al snapshot de outline), y por último el avance de las filas vivas.

pub mod memory;

pub use memory::InMemoryStore;

use assess_domain::{
    Assessment, OutlineHistoryRecord, OutlineNode, OutlineRecord, Section, SectionHistory, Task,
    TaskOp, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::EngineError;

/// Alta de un assessment (el backend asigna id y timestamps).
#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub title: String,
    pub tenant_id: String,
    pub app_id: i64,
    pub frameworks: Vec<i64>,
    pub template_id: i32,
    pub kind: Option<String>,
    pub locked: bool,
    pub location: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewOutline {
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    pub version: i32,
    pub outline_hash: Option<String>,
    pub tree: Vec<OutlineNode>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewSection {
    pub tenant_id: String,
    pub app_id: i64,
    pub assessment_id: i32,
    pub section_id: String,
    pub title: String,
    pub version: i32,
    pub content: Value,
    pub content_hash: Option<String>,
    pub copy_of: Option<i32>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub tenant_id: String,
    pub app_id: i64,
    pub op: TaskOp,
    pub status: TaskStatus,
    pub request_payload: Value,
    pub entity_type: String,
    pub entity_id: String,
    pub created_by: Uuid,
}

/// Un cambio de sección dentro de un commit. `before` es la fila viva tal
/// como se leyó (con `content_hash` rellenado si la fila no lo tenía).
#[derive(Debug, Clone)]
pub struct SectionCommitEntry {
    pub before: Section,
    pub new_content: Value,
    pub new_hash: String,
    pub copy_of: Option<i32>,
}

/// Avance atómico del documento: un snapshot de outline, N snapshots de
/// sección correlacionados, y el avance de todas las filas vivas implicadas.
#[derive(Debug, Clone)]
pub struct SectionCommit {
    pub outline_before: OutlineRecord,
    pub new_tree: Vec<OutlineNode>,
    pub new_outline_hash: String,
    pub actor: Uuid,
    pub entries: Vec<SectionCommitEntry>,
}

/// Reversión a una versión histórica: mismo bookkeeping de outline, pero la
/// fila viva de la sección se elimina y se inserta una nueva con `copy_of`
/// apuntando a la versión objetivo.
#[derive(Debug, Clone)]
pub struct ReversionCommit {
    pub outline_before: OutlineRecord,
    pub new_tree: Vec<OutlineNode>,
    pub new_outline_hash: String,
    pub actor: Uuid,
    pub section_before: Section,
    pub new_content: Value,
    pub new_hash: String,
    /// Versión histórica que el usuario pidió restaurar.
    pub target_version: i32,
}

/// Persistencia del documento versionado. Todas las lecturas están acotadas
/// por tenant; las filas soft-deleted no se devuelven.
pub trait DocumentStore: Send + Sync {
    fn insert_assessment(&self, rec: NewAssessment) -> Result<Assessment, EngineError>;
    fn get_assessment(&self, tenant_id: &str, id: i32) -> Result<Assessment, EngineError>;
    /// Persiste título, location/temp_location, locked y updated_by/on.
    fn save_assessment(&self, rec: &Assessment) -> Result<(), EngineError>;
    fn count_assessments(&self, tenant_id: &str, app_id: i64) -> Result<i64, EngineError>;
    fn any_locked(&self, tenant_id: &str, app_id: i64) -> Result<bool, EngineError>;
    fn set_locked(&self, assessment_id: i32, locked: bool) -> Result<(), EngineError>;
    /// Soft-delete + unlock en un paso (compensación de cancelación).
    fn soft_delete_assessment(&self, tenant_id: &str, assessment_id: i32)
        -> Result<(), EngineError>;

    fn insert_outline(&self, rec: NewOutline) -> Result<OutlineRecord, EngineError>;
    fn get_outline(&self, tenant_id: &str, assessment_id: i32)
        -> Result<OutlineRecord, EngineError>;
    fn insert_sections(&self, recs: Vec<NewSection>) -> Result<(), EngineError>;
    fn get_section(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Section, EngineError>;
    fn list_sections(&self, tenant_id: &str, assessment_id: i32)
        -> Result<Vec<Section>, EngineError>;

    /// Aplica el commit completo atómicamente. Devuelve el id de la fila de
    /// historial de outline creada (el `history_ref` de los snapshots).
    fn commit_section_update(&self, commit: SectionCommit) -> Result<i64, EngineError>;
    /// Aplica la reversión atómicamente y devuelve la nueva fila viva.
    fn commit_reversion(&self, commit: ReversionCommit) -> Result<Section, EngineError>;

    fn section_history_at(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
        version: i32,
    ) -> Result<Option<SectionHistory>, EngineError>;
    fn list_section_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Vec<SectionHistory>, EngineError>;
    fn list_outline_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<Vec<OutlineHistoryRecord>, EngineError>;

    /// Compensación de UPDATE_COMPLIANCE: los estándares de la app vuelven a
    /// quedar pendientes de sincronización.
    fn mark_compliance_pending(&self, tenant_id: &str, app_id: i64) -> Result<(), EngineError>;
    /// Compensación de EXPORT_TRUST_CENTER: soft-delete del export en curso.
    fn cancel_export(&self, tenant_id: &str, export_id: i64) -> Result<(), EngineError>;
}

/// Persistencia de tareas de fondo.
pub trait TaskStore: Send + Sync {
    fn insert(&self, rec: NewTask) -> Result<Task, EngineError>;
    /// Tarea + assessment en la misma transacción: o la generación queda
    /// registrada con su lock tomado, o nada queda.
    fn insert_with_assessment(
        &self,
        task: NewTask,
        assessment: NewAssessment,
    ) -> Result<(Task, Assessment), EngineError>;
    fn get(&self, id: i64) -> Result<Task, EngineError>;
    fn set_payload(&self, id: i64, payload: Value) -> Result<(), EngineError>;
    /// Transición compare-and-set: falla con `Conflict` si el estado actual
    /// ya es terminal. Estampa `updated_at`.
    fn transition(&self, id: i64, to: TaskStatus) -> Result<Task, EngineError>;
    /// Tarea activa más reciente de las operaciones dadas, actualizada
    /// después del corte.
    fn find_active(
        &self,
        tenant_id: &str,
        app_id: i64,
        ops: &[TaskOp],
        updated_after: DateTime<Utc>,
    ) -> Result<Option<Task>, EngineError>;
    /// Última tarea que frontea la entidad dada (para reportar estado).
    fn latest_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Task>, EngineError>;
    /// Pasa a FAILED toda tarea activa no tocada desde el corte y devuelve
    /// las filas afectadas.
    fn fail_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, EngineError>;
    fn list_recent(
        &self,
        tenant_id: &str,
        updated_after: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, EngineError>;
}
