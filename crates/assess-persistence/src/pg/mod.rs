//! Implementación Postgres (Diesel) de los stores del motor.
//!
//! Objetivo del módulo:
//! - Paridad 1:1 con el backend en memoria de assess-core: mismos contratos,
//!   misma semántica observable (CAS de tareas, commits atómicos de
//!   documento).
//! - Los commits compuestos corren en una única transacción
//!   (`build_transaction().read_write()`): snapshot de outline, snapshots de
//!   sección con `history_ref`, y avance de filas vivas, o nada.
//! - Errores transitorios (pool, serialización) se reintentan con backoff
//!   corto; los conflictos semánticos (fila obsoleta, estado terminal) se
//!   devuelven sin reintentar.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use assess_core::store::{
    DocumentStore, NewAssessment, NewOutline, NewSection, NewTask, ReversionCommit, SectionCommit,
    TaskStore,
};
use assess_core::EngineError;
use assess_domain::{
    Assessment, OutlineHistoryRecord, OutlineNode, OutlineRecord, Section, SectionHistory, Task,
    TaskOp, TaskStatus,
};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{
    app_standards, assessment_outline, assessment_outline_history, assessment_sections,
    assessment_sections_history, assessments, async_tasks, trust_center_exports,
};

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) o
/// factorear en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(
        &self,
    ) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(
        &self,
    ) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry con backoff exponencial muy pequeño (hasta 3 intentos).
/// No altera semántica de negocio; sólo repite la unidad de trabajo.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

// ---------------------------------------------------------------------------
// Filas Diesel y conversiones dominio <-> DB
// ---------------------------------------------------------------------------

#[derive(Queryable, Debug)]
struct AssessmentRow {
    id: i32,
    title: String,
    tenant_id: String,
    app_id: i64,
    frameworks: Vec<i64>,
    template_id: i32,
    kind: Option<String>,
    locked: bool,
    deleted: bool,
    location: Option<String>,
    temp_location: Option<String>,
    created_by: Uuid,
    created_on: DateTime<Utc>,
    updated_by: Uuid,
    updated_on: DateTime<Utc>,
}

impl From<AssessmentRow> for Assessment {
    fn from(r: AssessmentRow) -> Self {
        Assessment {
            id: r.id,
            title: r.title,
            tenant_id: r.tenant_id,
            app_id: r.app_id,
            frameworks: r.frameworks,
            template_id: r.template_id,
            kind: r.kind,
            locked: r.locked,
            deleted: r.deleted,
            location: r.location,
            temp_location: r.temp_location,
            created_by: r.created_by,
            created_on: r.created_on,
            updated_by: r.updated_by,
            updated_on: r.updated_on,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assessments)]
struct NewAssessmentRow<'a> {
    title: &'a str,
    tenant_id: &'a str,
    app_id: i64,
    frameworks: &'a [i64],
    template_id: i32,
    kind: Option<&'a str>,
    locked: bool,
    location: Option<&'a str>,
    created_by: &'a Uuid,
    updated_by: &'a Uuid,
}

fn new_assessment_row(rec: &NewAssessment) -> NewAssessmentRow<'_> {
    NewAssessmentRow {
        title: &rec.title,
        tenant_id: &rec.tenant_id,
        app_id: rec.app_id,
        frameworks: &rec.frameworks,
        template_id: rec.template_id,
        kind: rec.kind.as_deref(),
        locked: rec.locked,
        location: rec.location.as_deref(),
        created_by: &rec.created_by,
        updated_by: &rec.created_by,
    }
}

#[derive(Queryable, Debug)]
struct OutlineRow {
    id: i64,
    tenant_id: String,
    app_id: i64,
    assessment_id: i32,
    version: i32,
    outline_hash: Option<String>,
    tree: Value,
    created_by: Uuid,
    created_on: DateTime<Utc>,
    deleted: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assessment_outline)]
struct NewOutlineRow<'a> {
    tenant_id: &'a str,
    app_id: i64,
    assessment_id: i32,
    version: i32,
    outline_hash: Option<&'a str>,
    tree: &'a Value,
    created_by: &'a Uuid,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assessment_outline_history)]
struct NewOutlineHistoryRow<'a> {
    tenant_id: &'a str,
    app_id: i64,
    assessment_id: i32,
    version: i32,
    outline_hash: Option<&'a str>,
    tree: &'a Value,
    created_by: &'a Uuid,
    created_on: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct SectionRow {
    id: i64,
    tenant_id: String,
    app_id: i64,
    assessment_id: i32,
    section_id: String,
    title: String,
    version: i32,
    content: Value,
    content_hash: Option<String>,
    copy_of: Option<i32>,
    created_by: Uuid,
    created_on: DateTime<Utc>,
    deleted: bool,
}

impl From<SectionRow> for Section {
    fn from(r: SectionRow) -> Self {
        Section {
            id: r.id,
            tenant_id: r.tenant_id,
            app_id: r.app_id,
            assessment_id: r.assessment_id,
            section_id: r.section_id,
            title: r.title,
            version: r.version,
            content: r.content,
            content_hash: r.content_hash,
            copy_of: r.copy_of,
            created_by: r.created_by,
            created_on: r.created_on,
            deleted: r.deleted,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assessment_sections)]
struct NewSectionRow<'a> {
    tenant_id: &'a str,
    app_id: i64,
    assessment_id: i32,
    section_id: &'a str,
    title: &'a str,
    version: i32,
    content: &'a Value,
    content_hash: Option<&'a str>,
    copy_of: Option<i32>,
    created_by: &'a Uuid,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assessment_sections_history)]
struct NewSectionHistoryRow<'a> {
    tenant_id: &'a str,
    app_id: i64,
    assessment_id: i32,
    section_id: &'a str,
    title: &'a str,
    version: i32,
    content: &'a Value,
    content_hash: Option<&'a str>,
    copy_of: Option<i32>,
    history_ref: i64,
    created_by: &'a Uuid,
    created_on: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct SectionHistoryRow {
    id: i64,
    tenant_id: String,
    app_id: i64,
    assessment_id: i32,
    section_id: String,
    title: String,
    version: i32,
    content: Value,
    content_hash: Option<String>,
    copy_of: Option<i32>,
    history_ref: i64,
    created_by: Uuid,
    created_on: DateTime<Utc>,
    deleted: bool,
}

impl From<SectionHistoryRow> for SectionHistory {
    fn from(r: SectionHistoryRow) -> Self {
        SectionHistory {
            id: r.id,
            tenant_id: r.tenant_id,
            app_id: r.app_id,
            assessment_id: r.assessment_id,
            section_id: r.section_id,
            title: r.title,
            version: r.version,
            content: r.content,
            content_hash: r.content_hash,
            copy_of: r.copy_of,
            history_ref: r.history_ref,
            created_by: r.created_by,
            created_on: r.created_on,
            deleted: r.deleted,
        }
    }
}

#[derive(Queryable, Debug)]
struct TaskRow {
    id: i64,
    tenant_id: String,
    app_id: i64,
    op: String,
    status: String,
    request_payload: Value,
    entity_type: String,
    entity_id: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = async_tasks)]
struct NewTaskRow<'a> {
    tenant_id: &'a str,
    app_id: i64,
    op: &'a str,
    status: &'a str,
    request_payload: &'a Value,
    entity_type: &'a str,
    entity_id: &'a str,
    created_by: &'a Uuid,
}

fn row_to_task(r: TaskRow) -> Result<Task, PersistenceError> {
    let op = TaskOp::from_str(&r.op).map_err(|e| PersistenceError::Unknown(e.to_string()))?;
    let status =
        TaskStatus::from_str(&r.status).map_err(|e| PersistenceError::Unknown(e.to_string()))?;
    Ok(Task {
        id: r.id,
        tenant_id: r.tenant_id,
        app_id: r.app_id,
        op,
        status,
        request_payload: r.request_payload,
        entity_type: r.entity_type,
        entity_id: r.entity_id,
        created_by: r.created_by,
        created_at: r.created_at,
        updated_at: r.updated_at,
    })
}

fn tree_to_value(tree: &[OutlineNode]) -> Result<Value, PersistenceError> {
    serde_json::to_value(tree).map_err(|e| PersistenceError::Unknown(format!("ser tree: {e}")))
}

fn value_to_tree(v: Value) -> Result<Vec<OutlineNode>, PersistenceError> {
    serde_json::from_value(v).map_err(|e| PersistenceError::Unknown(format!("deser tree: {e}")))
}

fn row_to_outline(r: OutlineRow) -> Result<OutlineRecord, PersistenceError> {
    Ok(OutlineRecord {
        id: r.id,
        tenant_id: r.tenant_id,
        app_id: r.app_id,
        assessment_id: r.assessment_id,
        version: r.version,
        outline_hash: r.outline_hash,
        tree: value_to_tree(r.tree)?,
        created_by: r.created_by,
        created_on: r.created_on,
        deleted: r.deleted,
    })
}

fn row_to_outline_history(r: OutlineRow) -> Result<OutlineHistoryRecord, PersistenceError> {
    Ok(OutlineHistoryRecord {
        id: r.id,
        tenant_id: r.tenant_id,
        app_id: r.app_id,
        assessment_id: r.assessment_id,
        version: r.version,
        outline_hash: r.outline_hash,
        tree: value_to_tree(r.tree)?,
        created_by: r.created_by,
        created_on: r.created_on,
        deleted: r.deleted,
    })
}

const ACTIVE_STATUSES: [&str; 2] = ["PENDING", "IN_PROCESS"];

/// Store Postgres: una sola struct implementa ambos traits, igual que el
/// backend en memoria, porque tareas y documento comparten la base.
pub struct PgStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl PgStore<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }
}

impl<P: ConnectionProvider> DocumentStore for PgStore<P> {
    fn insert_assessment(&self, rec: NewAssessment) -> Result<Assessment, EngineError> {
        let row: AssessmentRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(assessments::table)
                .values(new_assessment_row(&rec))
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(row.into())
    }

    fn get_assessment(&self, tenant_id: &str, id: i32) -> Result<Assessment, EngineError> {
        let row: Option<AssessmentRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessments::table
                .filter(assessments::id.eq(id))
                .filter(assessments::tenant_id.eq(tenant_id))
                .filter(assessments::deleted.eq(false))
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        row.map(Assessment::from)
            .ok_or_else(|| EngineError::NotFound(format!("assessment {id}")))
    }

    fn save_assessment(&self, rec: &Assessment) -> Result<(), EngineError> {
        let affected = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(assessments::table.filter(assessments::id.eq(rec.id)))
                .set((
                    assessments::title.eq(&rec.title),
                    assessments::locked.eq(rec.locked),
                    assessments::deleted.eq(rec.deleted),
                    assessments::location.eq(rec.location.as_deref()),
                    assessments::temp_location.eq(rec.temp_location.as_deref()),
                    assessments::updated_by.eq(&rec.updated_by),
                    assessments::updated_on.eq(rec.updated_on),
                ))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if affected == 0 {
            return Err(EngineError::NotFound(format!("assessment {}", rec.id)));
        }
        Ok(())
    }

    fn count_assessments(&self, tenant_id: &str, app_id: i64) -> Result<i64, EngineError> {
        let count = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessments::table
                .filter(assessments::tenant_id.eq(tenant_id))
                .filter(assessments::app_id.eq(app_id))
                .filter(assessments::deleted.eq(false))
                .count()
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(count)
    }

    fn any_locked(&self, tenant_id: &str, app_id: i64) -> Result<bool, EngineError> {
        let count: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessments::table
                .filter(assessments::tenant_id.eq(tenant_id))
                .filter(assessments::app_id.eq(app_id))
                .filter(assessments::deleted.eq(false))
                .filter(assessments::locked.eq(true))
                .count()
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(count > 0)
    }

    fn set_locked(&self, assessment_id: i32, locked: bool) -> Result<(), EngineError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(assessments::table.filter(assessments::id.eq(assessment_id)))
                .set((assessments::locked.eq(locked), assessments::updated_on.eq(diesel::dsl::now)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn soft_delete_assessment(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<(), EngineError> {
        let affected = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(
                assessments::table
                    .filter(assessments::id.eq(assessment_id))
                    .filter(assessments::tenant_id.eq(tenant_id)),
            )
            .set((
                assessments::deleted.eq(true),
                assessments::locked.eq(false),
                assessments::updated_on.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .map_err(PersistenceError::from)
        })?;
        if affected == 0 {
            return Err(EngineError::NotFound(format!("assessment {assessment_id}")));
        }
        Ok(())
    }

    fn insert_outline(&self, rec: NewOutline) -> Result<OutlineRecord, EngineError> {
        let tree = tree_to_value(&rec.tree).map_err(EngineError::from)?;
        let row: OutlineRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(assessment_outline::table)
                .values(NewOutlineRow {
                    tenant_id: &rec.tenant_id,
                    app_id: rec.app_id,
                    assessment_id: rec.assessment_id,
                    version: rec.version,
                    outline_hash: rec.outline_hash.as_deref(),
                    tree: &tree,
                    created_by: &rec.created_by,
                })
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        row_to_outline(row).map_err(EngineError::from)
    }

    fn get_outline(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<OutlineRecord, EngineError> {
        let row: Option<OutlineRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_outline::table
                .filter(assessment_outline::tenant_id.eq(tenant_id))
                .filter(assessment_outline::assessment_id.eq(assessment_id))
                .filter(assessment_outline::deleted.eq(false))
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        match row {
            Some(r) => row_to_outline(r).map_err(EngineError::from),
            None => Err(EngineError::NotFound(format!("outline del assessment {assessment_id}"))),
        }
    }

    fn insert_sections(&self, recs: Vec<NewSection>) -> Result<(), EngineError> {
        if recs.is_empty() {
            return Ok(());
        }
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                for rec in &recs {
                    diesel::insert_into(assessment_sections::table)
                        .values(NewSectionRow {
                            tenant_id: &rec.tenant_id,
                            app_id: rec.app_id,
                            assessment_id: rec.assessment_id,
                            section_id: &rec.section_id,
                            title: &rec.title,
                            version: rec.version,
                            content: &rec.content,
                            content_hash: rec.content_hash.as_deref(),
                            copy_of: rec.copy_of,
                            created_by: &rec.created_by,
                        })
                        .execute(tx)?;
                }
                Ok::<(), PersistenceError>(())
            })
        })?;
        Ok(())
    }

    fn get_section(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Section, EngineError> {
        let row: Option<SectionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_sections::table
                .filter(assessment_sections::tenant_id.eq(tenant_id))
                .filter(assessment_sections::assessment_id.eq(assessment_id))
                .filter(assessment_sections::section_id.eq(section_id))
                .filter(assessment_sections::deleted.eq(false))
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        row.map(Section::from)
            .ok_or_else(|| EngineError::NotFound(format!("sección '{section_id}'")))
    }

    fn list_sections(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<Vec<Section>, EngineError> {
        let rows: Vec<SectionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_sections::table
                .filter(assessment_sections::tenant_id.eq(tenant_id))
                .filter(assessment_sections::assessment_id.eq(assessment_id))
                .filter(assessment_sections::deleted.eq(false))
                .order(assessment_sections::id.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(Section::from).collect())
    }

    fn commit_section_update(&self, commit: SectionCommit) -> Result<i64, EngineError> {
        debug!(
            "commit_section_update assessment={} secciones={}",
            commit.outline_before.assessment_id,
            commit.entries.len()
        );
        let before_tree = tree_to_value(&commit.outline_before.tree).map_err(EngineError::from)?;
        let new_tree = tree_to_value(&commit.new_tree).map_err(EngineError::from)?;
        let hid = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                let hid: i64 = diesel::insert_into(assessment_outline_history::table)
                    .values(NewOutlineHistoryRow {
                        tenant_id: &commit.outline_before.tenant_id,
                        app_id: commit.outline_before.app_id,
                        assessment_id: commit.outline_before.assessment_id,
                        version: commit.outline_before.version,
                        outline_hash: commit.outline_before.outline_hash.as_deref(),
                        tree: &before_tree,
                        created_by: &commit.outline_before.created_by,
                        created_on: commit.outline_before.created_on,
                    })
                    .returning(assessment_outline_history::id)
                    .get_result(tx)?;

                // Avance guardado por versión: si otro commit ganó, abortar.
                let advanced = diesel::update(
                    assessment_outline::table
                        .filter(assessment_outline::id.eq(commit.outline_before.id))
                        .filter(assessment_outline::version.eq(commit.outline_before.version)),
                )
                .set((
                    assessment_outline::tree.eq(&new_tree),
                    assessment_outline::outline_hash.eq(commit.new_outline_hash.as_str()),
                    assessment_outline::version.eq(commit.outline_before.version + 1),
                    assessment_outline::created_by.eq(&commit.actor),
                    assessment_outline::created_on.eq(diesel::dsl::now),
                ))
                .execute(tx)?;
                if advanced == 0 {
                    return Err(PersistenceError::StaleRow("el outline avanzó concurrentemente".into()));
                }

                for entry in &commit.entries {
                    diesel::insert_into(assessment_sections_history::table)
                        .values(NewSectionHistoryRow {
                            tenant_id: &entry.before.tenant_id,
                            app_id: entry.before.app_id,
                            assessment_id: entry.before.assessment_id,
                            section_id: &entry.before.section_id,
                            title: &entry.before.title,
                            version: entry.before.version,
                            content: &entry.before.content,
                            content_hash: entry.before.content_hash.as_deref(),
                            copy_of: entry.before.copy_of,
                            history_ref: hid,
                            created_by: &entry.before.created_by,
                            created_on: entry.before.created_on,
                        })
                        .execute(tx)?;
                    let advanced = diesel::update(
                        assessment_sections::table
                            .filter(assessment_sections::id.eq(entry.before.id))
                            .filter(assessment_sections::version.eq(entry.before.version)),
                    )
                    .set((
                        assessment_sections::version.eq(entry.before.version + 1),
                        assessment_sections::content.eq(&entry.new_content),
                        assessment_sections::content_hash.eq(entry.new_hash.as_str()),
                        assessment_sections::copy_of.eq(entry.copy_of),
                        assessment_sections::created_by.eq(&commit.actor),
                        assessment_sections::created_on.eq(diesel::dsl::now),
                    ))
                    .execute(tx)?;
                    if advanced == 0 {
                        return Err(PersistenceError::StaleRow(format!(
                            "la sección '{}' avanzó concurrentemente",
                            entry.before.section_id
                        )));
                    }
                }
                Ok(hid)
            })
        })?;
        Ok(hid)
    }

    fn commit_reversion(&self, commit: ReversionCommit) -> Result<Section, EngineError> {
        debug!(
            "commit_reversion assessment={} seccion={} target={}",
            commit.outline_before.assessment_id, commit.section_before.section_id,
            commit.target_version
        );
        let before_tree = tree_to_value(&commit.outline_before.tree).map_err(EngineError::from)?;
        let new_tree = tree_to_value(&commit.new_tree).map_err(EngineError::from)?;
        let row: SectionRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                let hid: i64 = diesel::insert_into(assessment_outline_history::table)
                    .values(NewOutlineHistoryRow {
                        tenant_id: &commit.outline_before.tenant_id,
                        app_id: commit.outline_before.app_id,
                        assessment_id: commit.outline_before.assessment_id,
                        version: commit.outline_before.version,
                        outline_hash: commit.outline_before.outline_hash.as_deref(),
                        tree: &before_tree,
                        created_by: &commit.outline_before.created_by,
                        created_on: commit.outline_before.created_on,
                    })
                    .returning(assessment_outline_history::id)
                    .get_result(tx)?;

                let advanced = diesel::update(
                    assessment_outline::table
                        .filter(assessment_outline::id.eq(commit.outline_before.id))
                        .filter(assessment_outline::version.eq(commit.outline_before.version)),
                )
                .set((
                    assessment_outline::tree.eq(&new_tree),
                    assessment_outline::outline_hash.eq(commit.new_outline_hash.as_str()),
                    assessment_outline::version.eq(commit.outline_before.version + 1),
                    assessment_outline::created_by.eq(&commit.actor),
                    assessment_outline::created_on.eq(diesel::dsl::now),
                ))
                .execute(tx)?;
                if advanced == 0 {
                    return Err(PersistenceError::StaleRow("el outline avanzó concurrentemente".into()));
                }

                diesel::insert_into(assessment_sections_history::table)
                    .values(NewSectionHistoryRow {
                        tenant_id: &commit.section_before.tenant_id,
                        app_id: commit.section_before.app_id,
                        assessment_id: commit.section_before.assessment_id,
                        section_id: &commit.section_before.section_id,
                        title: &commit.section_before.title,
                        version: commit.section_before.version,
                        content: &commit.section_before.content,
                        content_hash: commit.section_before.content_hash.as_deref(),
                        copy_of: commit.section_before.copy_of,
                        history_ref: hid,
                        created_by: &commit.section_before.created_by,
                        created_on: commit.section_before.created_on,
                    })
                    .execute(tx)?;

                // Revertir reemplaza la fila viva: delete + insert nueva.
                let deleted = diesel::delete(
                    assessment_sections::table
                        .filter(assessment_sections::id.eq(commit.section_before.id))
                        .filter(assessment_sections::version.eq(commit.section_before.version)),
                )
                .execute(tx)?;
                if deleted == 0 {
                    return Err(PersistenceError::StaleRow(format!(
                        "la sección '{}' avanzó concurrentemente",
                        commit.section_before.section_id
                    )));
                }
                let row: SectionRow = diesel::insert_into(assessment_sections::table)
                    .values(NewSectionRow {
                        tenant_id: &commit.section_before.tenant_id,
                        app_id: commit.section_before.app_id,
                        assessment_id: commit.section_before.assessment_id,
                        section_id: &commit.section_before.section_id,
                        title: &commit.section_before.title,
                        version: commit.section_before.version + 1,
                        content: &commit.new_content,
                        content_hash: Some(commit.new_hash.as_str()),
                        copy_of: Some(commit.target_version),
                        created_by: &commit.actor,
                    })
                    .get_result(tx)?;
                Ok(row)
            })
        })?;
        Ok(row.into())
    }

    fn section_history_at(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
        version: i32,
    ) -> Result<Option<SectionHistory>, EngineError> {
        let row: Option<SectionHistoryRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_sections_history::table
                .filter(assessment_sections_history::tenant_id.eq(tenant_id))
                .filter(assessment_sections_history::assessment_id.eq(assessment_id))
                .filter(assessment_sections_history::section_id.eq(section_id))
                .filter(assessment_sections_history::version.eq(version))
                .filter(assessment_sections_history::deleted.eq(false))
                .order(assessment_sections_history::id.desc())
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        Ok(row.map(SectionHistory::from))
    }

    fn list_section_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Vec<SectionHistory>, EngineError> {
        let rows: Vec<SectionHistoryRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_sections_history::table
                .filter(assessment_sections_history::tenant_id.eq(tenant_id))
                .filter(assessment_sections_history::assessment_id.eq(assessment_id))
                .filter(assessment_sections_history::section_id.eq(section_id))
                .filter(assessment_sections_history::deleted.eq(false))
                .order(assessment_sections_history::version.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(SectionHistory::from).collect())
    }

    fn list_outline_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<Vec<OutlineHistoryRecord>, EngineError> {
        let rows: Vec<OutlineRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            assessment_outline_history::table
                .filter(assessment_outline_history::tenant_id.eq(tenant_id))
                .filter(assessment_outline_history::assessment_id.eq(assessment_id))
                .filter(assessment_outline_history::deleted.eq(false))
                .order(assessment_outline_history::version.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|r| row_to_outline_history(r).map_err(EngineError::from))
            .collect()
    }

    fn mark_compliance_pending(&self, tenant_id: &str, app_id: i64) -> Result<(), EngineError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(
                app_standards::table
                    .filter(app_standards::tenant_id.eq(tenant_id))
                    .filter(app_standards::app_id.eq(app_id)),
            )
            .set((app_standards::sync_pending.eq(true), app_standards::updated_at.eq(diesel::dsl::now)))
            .execute(&mut conn)
            .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn cancel_export(&self, tenant_id: &str, export_id: i64) -> Result<(), EngineError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(
                trust_center_exports::table
                    .filter(trust_center_exports::id.eq(export_id))
                    .filter(trust_center_exports::tenant_id.eq(tenant_id)),
            )
            .set((
                trust_center_exports::deleted.eq(true),
                trust_center_exports::cancelled.eq(true),
            ))
            .execute(&mut conn)
            .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}

impl<P: ConnectionProvider> TaskStore for PgStore<P> {
    fn insert(&self, rec: NewTask) -> Result<Task, EngineError> {
        let row: TaskRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(async_tasks::table)
                .values(NewTaskRow {
                    tenant_id: &rec.tenant_id,
                    app_id: rec.app_id,
                    op: rec.op.as_str(),
                    status: rec.status.as_str(),
                    request_payload: &rec.request_payload,
                    entity_type: &rec.entity_type,
                    entity_id: &rec.entity_id,
                    created_by: &rec.created_by,
                })
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        row_to_task(row).map_err(EngineError::from)
    }

    fn insert_with_assessment(
        &self,
        task: NewTask,
        assessment: NewAssessment,
    ) -> Result<(Task, Assessment), EngineError> {
        let (task_row, assessment_row): (TaskRow, AssessmentRow) = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                let assessment_row: AssessmentRow = diesel::insert_into(assessments::table)
                    .values(new_assessment_row(&assessment))
                    .get_result(tx)?;
                let entity_id = assessment_row.id.to_string();
                let task_row: TaskRow = diesel::insert_into(async_tasks::table)
                    .values(NewTaskRow {
                        tenant_id: &task.tenant_id,
                        app_id: task.app_id,
                        op: task.op.as_str(),
                        status: task.status.as_str(),
                        request_payload: &task.request_payload,
                        entity_type: &task.entity_type,
                        entity_id: &entity_id,
                        created_by: &task.created_by,
                    })
                    .get_result(tx)?;
                Ok::<(TaskRow, AssessmentRow), PersistenceError>((task_row, assessment_row))
            })
        })?;
        Ok((row_to_task(task_row).map_err(EngineError::from)?, assessment_row.into()))
    }

    fn get(&self, id: i64) -> Result<Task, EngineError> {
        let row: Option<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            async_tasks::table
                .filter(async_tasks::id.eq(id))
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        match row {
            Some(r) => row_to_task(r).map_err(EngineError::from),
            None => Err(EngineError::NotFound(format!("tarea {id}"))),
        }
    }

    fn set_payload(&self, id: i64, payload: Value) -> Result<(), EngineError> {
        let affected = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(async_tasks::table.filter(async_tasks::id.eq(id)))
                .set((
                    async_tasks::request_payload.eq(&payload),
                    async_tasks::updated_at.eq(diesel::dsl::now),
                ))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if affected == 0 {
            return Err(EngineError::NotFound(format!("tarea {id}")));
        }
        Ok(())
    }

    fn transition(&self, id: i64, to: TaskStatus) -> Result<Task, EngineError> {
        // CAS: el WHERE exige estado no terminal; cero filas = carrera perdida
        // o tarea inexistente.
        let updated: Option<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(
                async_tasks::table
                    .filter(async_tasks::id.eq(id))
                    .filter(async_tasks::status.eq_any(ACTIVE_STATUSES)),
            )
            .set((async_tasks::status.eq(to.as_str()), async_tasks::updated_at.eq(diesel::dsl::now)))
            .get_result(&mut conn)
            .optional()
            .map_err(PersistenceError::from)
        })?;
        match updated {
            Some(row) => row_to_task(row).map_err(EngineError::from),
            None => {
                let current: Option<String> = with_retry(|| {
                    let mut conn = self.provider.connection()?;
                    async_tasks::table
                        .filter(async_tasks::id.eq(id))
                        .select(async_tasks::status)
                        .first(&mut conn)
                        .optional()
                        .map_err(PersistenceError::from)
                })?;
                match current {
                    Some(status) => Err(EngineError::Conflict(format!(
                        "tarea {id} ya terminal ({status})"
                    ))),
                    None => Err(EngineError::NotFound(format!("tarea {id}"))),
                }
            }
        }
    }

    fn find_active(
        &self,
        tenant_id: &str,
        app_id: i64,
        ops: &[TaskOp],
        updated_after: DateTime<Utc>,
    ) -> Result<Option<Task>, EngineError> {
        let op_names: Vec<&str> = ops.iter().map(|o| o.as_str()).collect();
        let row: Option<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            async_tasks::table
                .filter(async_tasks::tenant_id.eq(tenant_id))
                .filter(async_tasks::app_id.eq(app_id))
                .filter(async_tasks::op.eq_any(&op_names))
                .filter(async_tasks::status.eq_any(ACTIVE_STATUSES))
                .filter(async_tasks::updated_at.ge(updated_after))
                .order(async_tasks::updated_at.desc())
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        row.map(row_to_task).transpose().map_err(EngineError::from)
    }

    fn latest_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Task>, EngineError> {
        let row: Option<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            async_tasks::table
                .filter(async_tasks::tenant_id.eq(tenant_id))
                .filter(async_tasks::entity_type.eq(entity_type))
                .filter(async_tasks::entity_id.eq(entity_id))
                .order(async_tasks::id.desc())
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })?;
        row.map(row_to_task).transpose().map_err(EngineError::from)
    }

    fn fail_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, EngineError> {
        let rows: Vec<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(
                async_tasks::table
                    .filter(async_tasks::status.eq_any(ACTIVE_STATUSES))
                    .filter(async_tasks::updated_at.lt(older_than)),
            )
            .set((
                async_tasks::status.eq(TaskStatus::Failed.as_str()),
                async_tasks::updated_at.eq(diesel::dsl::now),
            ))
            .get_results(&mut conn)
            .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|r| row_to_task(r).map_err(EngineError::from))
            .collect()
    }

    fn list_recent(
        &self,
        tenant_id: &str,
        updated_after: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, EngineError> {
        let rows: Vec<TaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = async_tasks::table
                .filter(async_tasks::tenant_id.eq(tenant_id))
                .into_boxed();
            if let Some(cutoff) = updated_after {
                query = query.filter(async_tasks::updated_at.ge(cutoff));
            }
            query
                .order(async_tasks::updated_at.desc())
                .limit(limit.max(0))
                .offset(offset.max(0))
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|r| row_to_task(r).map_err(EngineError::from))
            .collect()
    }
}

/// Construye un pool Postgres r2d2 a partir de URL y corre las migraciones
/// pendientes en el primer checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(final_min))
        .max_size(validated_max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
