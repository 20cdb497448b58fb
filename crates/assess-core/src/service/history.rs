//! Lecturas de historial, diff entre versiones y la reversión
//! (rollback-forward: restaurar es avanzar, nunca reescribir).

use assess_domain::{outline, OutlineHistoryRecord, Section, SectionHistory};
use serde_json::Value;

use crate::errors::EngineError;
use crate::hashing::content_hash;
use crate::queue::QueueClient;
use crate::service::{Actor, AssessmentService};
use crate::store::{DocumentStore, ReversionCommit, TaskStore};

/// Comparación entre una versión histórica y su sucesora.
#[derive(Debug, Clone)]
pub struct SectionDiff {
    pub section_id: String,
    pub from_version: i32,
    pub to_version: i32,
    pub before: Value,
    pub after: Value,
    pub changed: bool,
}

impl<S, Q> AssessmentService<S, Q>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    pub fn section_history(
        &self,
        actor: &Actor,
        assessment_id: i32,
        section_id: &str,
    ) -> Result<Vec<SectionHistory>, EngineError> {
        self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        self.store.list_section_history(&actor.tenant_id, assessment_id, section_id)
    }

    pub fn outline_history(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<Vec<OutlineHistoryRecord>, EngineError> {
        self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        self.store.list_outline_history(&actor.tenant_id, assessment_id)
    }

    /// Diff de la versión `version` contra la siguiente. El lado "después"
    /// sale del historial en `version + 1` si existe; si no, la fila viva es
    /// la sucesora.
    pub fn section_diff(
        &self,
        actor: &Actor,
        assessment_id: i32,
        section_id: &str,
        version: i32,
    ) -> Result<SectionDiff, EngineError> {
        self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        let base = self
            .store
            .section_history_at(&actor.tenant_id, assessment_id, section_id, version)?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "sección '{section_id}' sin versión {version} en historial"
                ))
            })?;
        let (after, to_version) = match self.store.section_history_at(
            &actor.tenant_id,
            assessment_id,
            section_id,
            version + 1,
        )? {
            Some(next) => (next.content, next.version),
            None => {
                let live = self.store.get_section(&actor.tenant_id, assessment_id, section_id)?;
                (live.content, live.version)
            }
        };
        let changed = content_hash(&base.content) != content_hash(&after);
        Ok(SectionDiff {
            section_id: section_id.to_string(),
            from_version: version,
            to_version,
            before: base.content,
            after,
            changed,
        })
    }

    /// Revierte una sección a una versión histórica. La fila viva actual se
    /// reemplaza por una nueva con `copy_of` apuntando a la versión objetivo
    /// y versión `actual + 1`; el historial sólo crece.
    pub fn apply_section_version(
        &self,
        actor: &Actor,
        assessment_id: i32,
        section_id: &str,
        version: i32,
    ) -> Result<Section, EngineError> {
        self.load_unlocked(actor, assessment_id)?;
        let outline_before = self.store.get_outline(&actor.tenant_id, assessment_id)?;
        if outline::find_node(&outline_before.tree, section_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "sección '{section_id}' fuera del outline"
            )));
        }
        let target = self
            .store
            .section_history_at(&actor.tenant_id, assessment_id, section_id, version)?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "sección '{section_id}' sin versión {version} en historial"
                ))
            })?;
        let mut section_before =
            self.store.get_section(&actor.tenant_id, assessment_id, section_id)?;
        let prior_hash = section_before
            .content_hash
            .clone()
            .unwrap_or_else(|| content_hash(&section_before.content));
        section_before.content_hash = Some(prior_hash.clone());
        let new_hash = target
            .content_hash
            .clone()
            .unwrap_or_else(|| content_hash(&target.content));
        if prior_hash == new_hash {
            return Err(EngineError::Conflict("nada que actualizar".into()));
        }

        let mut new_tree = outline_before.tree.clone();
        outline::bump_section_version(&mut new_tree, section_id)?;
        let new_outline_hash = content_hash(&serde_json::to_value(&new_tree)?);

        self.store.commit_reversion(ReversionCommit {
            outline_before,
            new_tree,
            new_outline_hash,
            actor: actor.user_id,
            section_before,
            new_content: target.content,
            new_hash,
            target_version: version,
        })
    }
}
