//! Edición de secciones: el protocolo de actualización con detección de
//! no-cambios por hash, snapshot de historial y avance atómico; más las
//! lecturas de árbol/estado y el reemplazo de archivo en dos fases.

use std::collections::HashMap;

use assess_domain::{outline, Assessment, OutlineRecord, Section, Task};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::constants::ENTITY_ASSESSMENT;
use crate::errors::EngineError;
use crate::hashing::content_hash;
use crate::queue::QueueClient;
use crate::service::{Actor, AssessmentService};
use crate::store::{DocumentStore, SectionCommit, SectionCommitEntry, TaskStore};

/// Un cambio pedido por el usuario.
#[derive(Debug, Clone)]
pub struct SectionUpdate {
    pub section_id: String,
    pub content: Value,
    /// Versión histórica que el cliente declara como base de la edición; se
    /// persiste en `copy_of`. Ausente, la edición limpia el marcador.
    pub based_on: Option<i32>,
}

impl SectionUpdate {
    pub fn new(section_id: impl Into<String>, content: Value) -> Self {
        Self { section_id: section_id.into(), content, based_on: None }
    }

    pub fn based_on(mut self, version: i32) -> Self {
        self.based_on = Some(version);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Secciones que efectivamente cambiaron, con su versión nueva.
    pub updated: Vec<(String, i32)>,
    /// Id de la fila de historial de outline creada por el commit.
    pub history_ref: i64,
}

/// Vista compuesta: outline vivo + filas vivas de sección.
#[derive(Debug, Clone)]
pub struct SectionTree {
    pub outline: OutlineRecord,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone)]
pub struct AssessmentStatus {
    pub assessment: Assessment,
    /// Última tarea que fronteó este assessment, si alguna.
    pub task: Option<Task>,
}

impl<S, Q> AssessmentService<S, Q>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    /// Actualiza una sección. Conflicto si el contenido no cambió.
    pub fn update_section(
        &self,
        actor: &Actor,
        assessment_id: i32,
        update: SectionUpdate,
    ) -> Result<UpdateOutcome, EngineError> {
        self.update_sections(actor, assessment_id, vec![update])
    }

    /// Actualiza un lote de secciones compartiendo un único snapshot de
    /// outline. Las secciones sin cambio real se omiten; si ninguna cambió,
    /// la operación entera es un conflicto "nada que actualizar".
    pub fn update_sections(
        &self,
        actor: &Actor,
        assessment_id: i32,
        updates: Vec<SectionUpdate>,
    ) -> Result<UpdateOutcome, EngineError> {
        if updates.is_empty() {
            return Err(EngineError::Validation("lote de actualizaciones vacío".into()));
        }
        self.load_unlocked(actor, assessment_id)?;
        let outline_before = self.store.get_outline(&actor.tenant_id, assessment_id)?;

        let mut entries = Vec::new();
        let mut changed_ids = Vec::new();
        for update in updates {
            if outline::find_node(&outline_before.tree, &update.section_id).is_none() {
                return Err(EngineError::NotFound(format!(
                    "sección '{}' fuera del outline",
                    update.section_id
                )));
            }
            let mut before =
                self.store.get_section(&actor.tenant_id, assessment_id, &update.section_id)?;
            // Backfill: filas sembradas antes de que existiera el hash.
            let prior_hash = before
                .content_hash
                .clone()
                .unwrap_or_else(|| content_hash(&before.content));
            before.content_hash = Some(prior_hash.clone());
            let new_hash = content_hash(&update.content);
            if prior_hash == new_hash {
                continue;
            }
            changed_ids.push(update.section_id.clone());
            entries.push(SectionCommitEntry {
                before,
                new_content: update.content,
                new_hash,
                // El marcador refleja la base declarada de esta edición; sin
                // base, se limpia.
                copy_of: update.based_on,
            });
        }
        if entries.is_empty() {
            return Err(EngineError::Conflict("nada que actualizar".into()));
        }

        let mut new_tree = outline_before.tree.clone();
        outline::bump_section_versions(&mut new_tree, &changed_ids);
        let new_outline_hash = content_hash(&serde_json::to_value(&new_tree)?);

        let updated = entries
            .iter()
            .map(|e| (e.before.section_id.clone(), e.before.version + 1))
            .collect();
        let history_ref = self.store.commit_section_update(SectionCommit {
            outline_before,
            new_tree,
            new_outline_hash,
            actor: actor.user_id,
            entries,
        })?;
        Ok(UpdateOutcome { updated, history_ref })
    }

    /// Outline vivo más las filas vivas de sección del assessment, en el
    /// orden del documento (preorden del árbol).
    pub fn fetch_section_tree(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<SectionTree, EngineError> {
        self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        let outline = self.store.get_outline(&actor.tenant_id, assessment_id)?;
        let mut sections = self.store.list_sections(&actor.tenant_id, assessment_id)?;
        let order: HashMap<&str, usize> = outline::flatten(&outline.tree)
            .into_iter()
            .enumerate()
            .map(|(i, node)| (node.section_id.as_str(), i))
            .collect();
        // Filas fuera del outline (no debería haberlas) quedan al final.
        sections.sort_by_key(|s| order.get(s.section_id.as_str()).copied().unwrap_or(usize::MAX));
        Ok(SectionTree { outline, sections })
    }

    /// Estado del assessment y de su última tarea asociada.
    pub fn assessment_status(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<AssessmentStatus, EngineError> {
        let assessment = self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        let task = self.store.latest_for_entity(
            &actor.tenant_id,
            ENTITY_ASSESSMENT,
            &assessment_id.to_string(),
        )?;
        Ok(AssessmentStatus { assessment, task })
    }

    /// Tareas recientes del tenant, más nuevas primero (polling de UI).
    pub fn recent_tasks(
        &self,
        actor: &Actor,
        updated_after: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, EngineError> {
        self.store.list_recent(&actor.tenant_id, updated_after, limit, offset)
    }

    /// Deja un archivo subido en staging (`temp_location`). Se permite con el
    /// assessment bloqueado: promover es lo que exige exclusividad.
    pub fn stage_upload(
        &self,
        actor: &Actor,
        assessment_id: i32,
        key: String,
    ) -> Result<Assessment, EngineError> {
        let mut assessment = self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        assessment.temp_location = Some(key);
        assessment.updated_by = actor.user_id;
        assessment.updated_on = Utc::now();
        self.store.save_assessment(&assessment)?;
        Ok(assessment)
    }

    /// Fase dos del reemplazo de archivo: promueve `temp_location` a
    /// `location` y borra el archivo anterior.
    pub fn promote_upload(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<Assessment, EngineError> {
        let mut assessment = self.load_unlocked(actor, assessment_id)?;
        let staged = assessment.temp_location.take().ok_or_else(|| {
            EngineError::Validation("no hay archivo en staging para promover".into())
        })?;
        if let Some(old) = assessment.location.replace(staged) {
            self.objects.delete(&[old])?;
        }
        assessment.updated_by = actor.user_id;
        assessment.updated_on = Utc::now();
        self.store.save_assessment(&assessment)?;
        Ok(assessment)
    }

    /// URL firmada de descarga del archivo generado.
    pub fn download_location(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<String, EngineError> {
        let assessment = self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        let location = assessment.location.ok_or_else(|| {
            EngineError::NotFound(format!("assessment {assessment_id} sin archivo generado"))
        })?;
        self.objects.signed_url(&location)
    }
}
