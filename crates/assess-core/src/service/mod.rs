//! Servicio de assessments: orquesta stores, cola, object storage y
//! templates. Cada operación de escritura valida el lock consultivo del
//! assessment antes de tocar nada.

pub mod cancel;
pub mod create;
pub mod history;
pub mod sections;

pub use create::{CreateAssessmentOutcome, CreateAssessmentRequest};
pub use history::SectionDiff;
pub use sections::{AssessmentStatus, SectionTree, SectionUpdate, UpdateOutcome};

use std::sync::Arc;

use assess_domain::Assessment;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::external::{ObjectStore, TemplateSource};
use crate::license::LicenseRule;
use crate::queue::{Dispatcher, QueueClient};
use crate::store::{DocumentStore, TaskStore};

/// Identidad del llamador, ya autenticada aguas arriba.
#[derive(Debug, Clone)]
pub struct Actor {
    pub tenant_id: String,
    pub user_id: Uuid,
}

pub struct AssessmentService<S, Q: QueueClient> {
    store: Arc<S>,
    dispatcher: Dispatcher<Q>,
    objects: Arc<dyn ObjectStore>,
    templates: Arc<dyn TemplateSource>,
    license: LicenseRule,
}

impl<S, Q> AssessmentService<S, Q>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    pub fn new(
        store: Arc<S>,
        dispatcher: Dispatcher<Q>,
        objects: Arc<dyn ObjectStore>,
        templates: Arc<dyn TemplateSource>,
        license: LicenseRule,
    ) -> Self {
        Self { store, dispatcher, objects, templates, license }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Carga el assessment del tenant y rechaza si está bloqueado por una
    /// tarea en curso.
    pub(crate) fn load_unlocked(
        &self,
        actor: &Actor,
        assessment_id: i32,
    ) -> Result<Assessment, EngineError> {
        let assessment = self.store.get_assessment(&actor.tenant_id, assessment_id)?;
        if assessment.locked {
            return Err(EngineError::Conflict(format!(
                "assessment {assessment_id} bloqueado por una tarea en curso"
            )));
        }
        Ok(assessment)
    }
}
