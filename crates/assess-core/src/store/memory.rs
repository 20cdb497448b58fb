//! Backend en memoria: un `Mutex` sobre todo el estado hace trivial la
//! atomicidad de los commits compuestos. Es el backend de los tests de motor
//! y del binario de demo; `assess-persistence` replica esta semántica sobre
//! Postgres.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use assess_domain::{
    Assessment, OutlineHistoryRecord, OutlineRecord, Section, SectionHistory, Task, TaskOp,
    TaskStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::EngineError;
use crate::store::{
    DocumentStore, NewAssessment, NewOutline, NewSection, NewTask, ReversionCommit, SectionCommit,
    TaskStore,
};

#[derive(Default)]
struct Inner {
    assessments: Vec<Assessment>,
    outlines: Vec<OutlineRecord>,
    outline_history: Vec<OutlineHistoryRecord>,
    sections: Vec<Section>,
    section_history: Vec<SectionHistory>,
    tasks: Vec<Task>,
    compliance_pending: HashSet<(String, i64)>,
    cancelled_exports: HashSet<(String, i64)>,
    next_assessment_id: i32,
    next_row_id: i64,
    next_task_id: i64,
}

impl Inner {
    fn row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Infrastructure("store lock envenenado".into()))
    }

    /// Inspección para tests: ¿quedó la app marcada con compliance pendiente?
    pub fn compliance_is_pending(&self, tenant_id: &str, app_id: i64) -> bool {
        self.inner
            .lock()
            .map(|g| g.compliance_pending.contains(&(tenant_id.to_string(), app_id)))
            .unwrap_or(false)
    }

    /// Inspección para tests: ¿se canceló el export dado?
    pub fn export_is_cancelled(&self, tenant_id: &str, export_id: i64) -> bool {
        self.inner
            .lock()
            .map(|g| g.cancelled_exports.contains(&(tenant_id.to_string(), export_id)))
            .unwrap_or(false)
    }
}

impl DocumentStore for InMemoryStore {
    fn insert_assessment(&self, rec: NewAssessment) -> Result<Assessment, EngineError> {
        let mut g = self.lock()?;
        Ok(push_assessment(&mut g, rec))
    }

    fn get_assessment(&self, tenant_id: &str, id: i32) -> Result<Assessment, EngineError> {
        let g = self.lock()?;
        g.assessments
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.id == id && !a.deleted)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("assessment {id}")))
    }

    fn save_assessment(&self, rec: &Assessment) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        let row = g
            .assessments
            .iter_mut()
            .find(|a| a.id == rec.id)
            .ok_or_else(|| EngineError::NotFound(format!("assessment {}", rec.id)))?;
        *row = rec.clone();
        Ok(())
    }

    fn count_assessments(&self, tenant_id: &str, app_id: i64) -> Result<i64, EngineError> {
        let g = self.lock()?;
        Ok(g.assessments
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.app_id == app_id && !a.deleted)
            .count() as i64)
    }

    fn any_locked(&self, tenant_id: &str, app_id: i64) -> Result<bool, EngineError> {
        let g = self.lock()?;
        Ok(g.assessments
            .iter()
            .any(|a| a.tenant_id == tenant_id && a.app_id == app_id && !a.deleted && a.locked))
    }

    fn set_locked(&self, assessment_id: i32, locked: bool) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        if let Some(a) = g.assessments.iter_mut().find(|a| a.id == assessment_id) {
            a.locked = locked;
            a.updated_on = Utc::now();
        }
        Ok(())
    }

    fn soft_delete_assessment(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        let row = g
            .assessments
            .iter_mut()
            .find(|a| a.tenant_id == tenant_id && a.id == assessment_id)
            .ok_or_else(|| EngineError::NotFound(format!("assessment {assessment_id}")))?;
        row.deleted = true;
        row.locked = false;
        row.updated_on = Utc::now();
        Ok(())
    }

    fn insert_outline(&self, rec: NewOutline) -> Result<OutlineRecord, EngineError> {
        let mut g = self.lock()?;
        let row = OutlineRecord {
            id: g.row_id(),
            tenant_id: rec.tenant_id,
            app_id: rec.app_id,
            assessment_id: rec.assessment_id,
            version: rec.version,
            outline_hash: rec.outline_hash,
            tree: rec.tree,
            created_by: rec.created_by,
            created_on: Utc::now(),
            deleted: false,
        };
        g.outlines.push(row.clone());
        Ok(row)
    }

    fn get_outline(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<OutlineRecord, EngineError> {
        let g = self.lock()?;
        g.outlines
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.assessment_id == assessment_id && !o.deleted)
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!("outline del assessment {assessment_id}"))
            })
    }

    fn insert_sections(&self, recs: Vec<NewSection>) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        for rec in recs {
            let row = Section {
                id: g.row_id(),
                tenant_id: rec.tenant_id,
                app_id: rec.app_id,
                assessment_id: rec.assessment_id,
                section_id: rec.section_id,
                title: rec.title,
                version: rec.version,
                content: rec.content,
                content_hash: rec.content_hash,
                copy_of: rec.copy_of,
                created_by: rec.created_by,
                created_on: Utc::now(),
                deleted: false,
            };
            g.sections.push(row);
        }
        Ok(())
    }

    fn get_section(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Section, EngineError> {
        let g = self.lock()?;
        g.sections
            .iter()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.assessment_id == assessment_id
                    && s.section_id == section_id
                    && !s.deleted
            })
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("sección '{section_id}'")))
    }

    fn list_sections(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<Vec<Section>, EngineError> {
        let g = self.lock()?;
        Ok(g.sections
            .iter()
            .filter(|s| {
                s.tenant_id == tenant_id && s.assessment_id == assessment_id && !s.deleted
            })
            .cloned()
            .collect())
    }

    fn commit_section_update(&self, commit: SectionCommit) -> Result<i64, EngineError> {
        let mut g = self.lock()?;
        let now = Utc::now();
        let hid = g.row_id();
        // Lectura obsoleta: otro commit avanzó el outline desde que se leyó.
        let live_version = g
            .outlines
            .iter()
            .find(|o| o.id == commit.outline_before.id)
            .map(|o| o.version)
            .ok_or_else(|| EngineError::NotFound("outline".into()))?;
        if live_version != commit.outline_before.version {
            return Err(EngineError::Conflict("el outline avanzó concurrentemente".into()));
        }
        g.outline_history.push(OutlineHistoryRecord {
            id: hid,
            tenant_id: commit.outline_before.tenant_id.clone(),
            app_id: commit.outline_before.app_id,
            assessment_id: commit.outline_before.assessment_id,
            version: commit.outline_before.version,
            outline_hash: commit.outline_before.outline_hash.clone(),
            tree: commit.outline_before.tree.clone(),
            created_by: commit.outline_before.created_by,
            created_on: commit.outline_before.created_on,
            deleted: false,
        });
        for entry in &commit.entries {
            let sid = g.row_id();
            g.section_history.push(SectionHistory {
                id: sid,
                tenant_id: entry.before.tenant_id.clone(),
                app_id: entry.before.app_id,
                assessment_id: entry.before.assessment_id,
                section_id: entry.before.section_id.clone(),
                title: entry.before.title.clone(),
                version: entry.before.version,
                content: entry.before.content.clone(),
                content_hash: entry.before.content_hash.clone(),
                copy_of: entry.before.copy_of,
                history_ref: hid,
                created_by: entry.before.created_by,
                created_on: entry.before.created_on,
                deleted: false,
            });
        }
        if let Some(o) = g.outlines.iter_mut().find(|o| o.id == commit.outline_before.id) {
            o.tree = commit.new_tree.clone();
            o.outline_hash = Some(commit.new_outline_hash.clone());
            o.version += 1;
            o.created_by = commit.actor;
            o.created_on = now;
        }
        for entry in &commit.entries {
            let row = g
                .sections
                .iter_mut()
                .find(|s| s.id == entry.before.id)
                .ok_or_else(|| {
                    EngineError::NotFound(format!("sección '{}'", entry.before.section_id))
                })?;
            row.version += 1;
            row.content = entry.new_content.clone();
            row.content_hash = Some(entry.new_hash.clone());
            row.copy_of = entry.copy_of;
            row.created_by = commit.actor;
            row.created_on = now;
        }
        Ok(hid)
    }

    fn commit_reversion(&self, commit: ReversionCommit) -> Result<Section, EngineError> {
        let mut g = self.lock()?;
        let now = Utc::now();
        let hid = g.row_id();
        g.outline_history.push(OutlineHistoryRecord {
            id: hid,
            tenant_id: commit.outline_before.tenant_id.clone(),
            app_id: commit.outline_before.app_id,
            assessment_id: commit.outline_before.assessment_id,
            version: commit.outline_before.version,
            outline_hash: commit.outline_before.outline_hash.clone(),
            tree: commit.outline_before.tree.clone(),
            created_by: commit.outline_before.created_by,
            created_on: commit.outline_before.created_on,
            deleted: false,
        });
        let sid = g.row_id();
        g.section_history.push(SectionHistory {
            id: sid,
            tenant_id: commit.section_before.tenant_id.clone(),
            app_id: commit.section_before.app_id,
            assessment_id: commit.section_before.assessment_id,
            section_id: commit.section_before.section_id.clone(),
            title: commit.section_before.title.clone(),
            version: commit.section_before.version,
            content: commit.section_before.content.clone(),
            content_hash: commit.section_before.content_hash.clone(),
            copy_of: commit.section_before.copy_of,
            history_ref: hid,
            created_by: commit.section_before.created_by,
            created_on: commit.section_before.created_on,
            deleted: false,
        });
        if let Some(o) = g.outlines.iter_mut().find(|o| o.id == commit.outline_before.id) {
            o.tree = commit.new_tree.clone();
            o.outline_hash = Some(commit.new_outline_hash.clone());
            o.version += 1;
            o.created_by = commit.actor;
            o.created_on = now;
        }
        g.sections.retain(|s| s.id != commit.section_before.id);
        let replacement = Section {
            id: g.row_id(),
            tenant_id: commit.section_before.tenant_id.clone(),
            app_id: commit.section_before.app_id,
            assessment_id: commit.section_before.assessment_id,
            section_id: commit.section_before.section_id.clone(),
            title: commit.section_before.title.clone(),
            version: commit.section_before.version + 1,
            content: commit.new_content,
            content_hash: Some(commit.new_hash),
            copy_of: Some(commit.target_version),
            created_by: commit.actor,
            created_on: now,
            deleted: false,
        };
        g.sections.push(replacement.clone());
        Ok(replacement)
    }

    fn section_history_at(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
        version: i32,
    ) -> Result<Option<SectionHistory>, EngineError> {
        let g = self.lock()?;
        Ok(g.section_history
            .iter()
            .filter(|h| {
                h.tenant_id == tenant_id
                    && h.assessment_id == assessment_id
                    && h.section_id == section_id
                    && h.version == version
                    && !h.deleted
            })
            .max_by_key(|h| h.id)
            .cloned())
    }

    fn list_section_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Vec<SectionHistory>, EngineError> {
        let g = self.lock()?;
        let mut rows: Vec<SectionHistory> = g
            .section_history
            .iter()
            .filter(|h| {
                h.tenant_id == tenant_id
                    && h.assessment_id == assessment_id
                    && h.section_id == section_id
                    && !h.deleted
            })
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.version);
        Ok(rows)
    }

    fn list_outline_history(
        &self,
        tenant_id: &str,
        assessment_id: i32,
    ) -> Result<Vec<OutlineHistoryRecord>, EngineError> {
        let g = self.lock()?;
        let mut rows: Vec<OutlineHistoryRecord> = g
            .outline_history
            .iter()
            .filter(|h| {
                h.tenant_id == tenant_id && h.assessment_id == assessment_id && !h.deleted
            })
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.version);
        Ok(rows)
    }

    fn mark_compliance_pending(&self, tenant_id: &str, app_id: i64) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        g.compliance_pending.insert((tenant_id.to_string(), app_id));
        Ok(())
    }

    fn cancel_export(&self, tenant_id: &str, export_id: i64) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        g.cancelled_exports.insert((tenant_id.to_string(), export_id));
        Ok(())
    }
}

impl TaskStore for InMemoryStore {
    fn insert(&self, rec: NewTask) -> Result<Task, EngineError> {
        let mut g = self.lock()?;
        Ok(push_task(&mut g, rec))
    }

    fn insert_with_assessment(
        &self,
        task: NewTask,
        assessment: NewAssessment,
    ) -> Result<(Task, Assessment), EngineError> {
        let mut g = self.lock()?;
        let assessment = push_assessment(&mut g, assessment);
        let mut task = task;
        task.entity_id = assessment.id.to_string();
        let task = push_task(&mut g, task);
        Ok((task, assessment))
    }

    fn get(&self, id: i64) -> Result<Task, EngineError> {
        let g = self.lock()?;
        g.tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("tarea {id}")))
    }

    fn set_payload(&self, id: i64, payload: Value) -> Result<(), EngineError> {
        let mut g = self.lock()?;
        let t = g
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("tarea {id}")))?;
        t.request_payload = payload;
        t.updated_at = Utc::now();
        Ok(())
    }

    fn transition(&self, id: i64, to: TaskStatus) -> Result<Task, EngineError> {
        let mut g = self.lock()?;
        let t = g
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("tarea {id}")))?;
        if t.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "tarea {id} ya terminal ({})",
                t.status.as_str()
            )));
        }
        t.status = to;
        t.updated_at = Utc::now();
        Ok(t.clone())
    }

    fn find_active(
        &self,
        tenant_id: &str,
        app_id: i64,
        ops: &[TaskOp],
        updated_after: DateTime<Utc>,
    ) -> Result<Option<Task>, EngineError> {
        let g = self.lock()?;
        Ok(g.tasks
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.app_id == app_id
                    && ops.contains(&t.op)
                    && TaskStatus::active().contains(&t.status)
                    && t.updated_at >= updated_after
            })
            .max_by_key(|t| t.updated_at)
            .cloned())
    }

    fn latest_for_entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Task>, EngineError> {
        let g = self.lock()?;
        Ok(g.tasks
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.entity_type == entity_type
                    && t.entity_id == entity_id
            })
            .max_by_key(|t| t.id)
            .cloned())
    }

    fn fail_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, EngineError> {
        let mut g = self.lock()?;
        let now = Utc::now();
        let mut swept = Vec::new();
        for t in g.tasks.iter_mut() {
            if TaskStatus::active().contains(&t.status) && t.updated_at < older_than {
                t.status = TaskStatus::Failed;
                t.updated_at = now;
                swept.push(t.clone());
            }
        }
        Ok(swept)
    }

    fn list_recent(
        &self,
        tenant_id: &str,
        updated_after: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, EngineError> {
        let g = self.lock()?;
        let mut rows: Vec<Task> = g
            .tasks
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && updated_after.map(|c| t.updated_at >= c).unwrap_or(true)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

fn push_assessment(g: &mut Inner, rec: NewAssessment) -> Assessment {
    g.next_assessment_id += 1;
    let now = Utc::now();
    let row = Assessment {
        id: g.next_assessment_id,
        title: rec.title,
        tenant_id: rec.tenant_id,
        app_id: rec.app_id,
        frameworks: rec.frameworks,
        template_id: rec.template_id,
        kind: rec.kind,
        locked: rec.locked,
        deleted: false,
        location: rec.location,
        temp_location: None,
        created_by: rec.created_by,
        created_on: now,
        updated_by: rec.created_by,
        updated_on: now,
    };
    g.assessments.push(row.clone());
    row
}

fn push_task(g: &mut Inner, rec: NewTask) -> Task {
    g.next_task_id += 1;
    let now = Utc::now();
    let row = Task {
        id: g.next_task_id,
        tenant_id: rec.tenant_id,
        app_id: rec.app_id,
        op: rec.op,
        status: rec.status,
        request_payload: rec.request_payload,
        entity_type: rec.entity_type,
        entity_id: rec.entity_id,
        created_by: rec.created_by,
        created_at: now,
        updated_at: now,
    };
    g.tasks.push(row.clone());
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn new_task(op: TaskOp) -> NewTask {
        NewTask {
            tenant_id: "t1".into(),
            app_id: 7,
            op,
            status: TaskStatus::Pending,
            request_payload: json!({}),
            entity_type: "assessment".into(),
            entity_id: "1".into(),
            created_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn transition_from_terminal_is_conflict() {
        let store = InMemoryStore::new();
        let t = TaskStore::insert(&store, new_task(TaskOp::CreateAssessments)).unwrap();
        store.transition(t.id, TaskStatus::Cancelled).unwrap();
        let err = store.transition(t.id, TaskStatus::Processed).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(store.get(t.id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn fail_stuck_only_touches_old_active_tasks() {
        let store = InMemoryStore::new();
        let stale = TaskStore::insert(&store, new_task(TaskOp::CreateAssessments)).unwrap();
        let done = TaskStore::insert(&store, new_task(TaskOp::UpdateCompliance)).unwrap();
        store.transition(done.id, TaskStatus::Processed).unwrap();
        // Todo lo activo anterior a "ahora + 1s" está colgado.
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let swept = store.fail_stuck(cutoff).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, stale.id);
        assert_eq!(store.get(stale.id).unwrap().status, TaskStatus::Failed);
        assert_eq!(store.get(done.id).unwrap().status, TaskStatus::Processed);
    }

    #[test]
    fn insert_with_assessment_links_entity_id() {
        let store = InMemoryStore::new();
        let (task, assessment) = store
            .insert_with_assessment(
                new_task(TaskOp::CreateAssessments),
                NewAssessment {
                    title: "SOC2".into(),
                    tenant_id: "t1".into(),
                    app_id: 7,
                    frameworks: vec![1],
                    template_id: 3,
                    kind: Some("word".into()),
                    locked: true,
                    location: None,
                    created_by: Uuid::new_v4(),
                },
            )
            .unwrap();
        assert_eq!(task.entity_id, assessment.id.to_string());
        assert!(assessment.locked);
    }
}
