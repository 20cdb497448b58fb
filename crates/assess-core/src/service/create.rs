//! Creación de assessments: validaciones de licencia y cuota, exclusión por
//! app, y las tres ramas según el template (word síncrono, excel por copia de
//! archivo, sembrado + enriquecimiento por cola).

use assess_domain::{TaskOp, TaskStatus, TemplateKind, TemplateSpec};
use chrono::{Duration, Utc};
use log::info;
use serde_json::json;

use crate::constants::{ENTITY_ASSESSMENT, INITIAL_VERSION, PENDING_TASK_VISIBILITY_SECS};
use crate::errors::EngineError;
use crate::hashing::content_hash;
use crate::queue::{Dispatch, QueueClient};
use crate::service::{Actor, AssessmentService};
use crate::store::{DocumentStore, NewAssessment, NewOutline, NewSection, NewTask, TaskStore};

#[derive(Debug, Clone)]
pub struct CreateAssessmentRequest {
    pub title: String,
    pub app_id: i64,
    pub frameworks: Vec<i64>,
    pub template_id: i32,
}

#[derive(Debug, Clone)]
pub struct CreateAssessmentOutcome {
    pub assessment_id: i32,
    pub task_id: i64,
    /// PROCESSED si la generación terminó inline; PENDING si quedó en cola.
    pub status: TaskStatus,
}

impl<S, Q> AssessmentService<S, Q>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    pub fn create_assessment(
        &self,
        actor: &Actor,
        req: CreateAssessmentRequest,
    ) -> Result<CreateAssessmentOutcome, EngineError> {
        self.validate_create(actor, &req)?;
        let template = self.templates.template(req.template_id)?;

        let new_assessment = NewAssessment {
            title: req.title.clone(),
            tenant_id: actor.tenant_id.clone(),
            app_id: req.app_id,
            frameworks: req.frameworks.clone(),
            template_id: req.template_id,
            kind: Some(template.kind.as_str().to_string()),
            locked: true,
            location: None,
            created_by: actor.user_id,
        };
        let new_task = NewTask {
            tenant_id: actor.tenant_id.clone(),
            app_id: req.app_id,
            op: TaskOp::CreateAssessments,
            status: TaskStatus::Pending,
            request_payload: json!({}),
            entity_type: ENTITY_ASSESSMENT.to_string(),
            // La reemplaza el store con el id real del assessment.
            entity_id: String::new(),
            created_by: actor.user_id,
        };
        let (task, mut assessment) =
            self.store.insert_with_assessment(new_task, new_assessment)?;

        match template.kind {
            TemplateKind::Excel => {
                let location = template.location.clone().ok_or_else(|| {
                    EngineError::Validation("el template excel no tiene archivo subido".into())
                })?;
                let key = format!(
                    "{}/{}/assessment/{}/{}.xlsx",
                    actor.tenant_id,
                    req.app_id,
                    assessment.id,
                    Utc::now().timestamp_millis()
                );
                self.objects.copy(&location, &key)?;
                assessment.location = Some(key);
                assessment.updated_by = actor.user_id;
                assessment.updated_on = Utc::now();
                self.store.save_assessment(&assessment)?;
            }
            TemplateKind::Word => {
                self.seed_document(actor, &req, assessment.id, &template)?;
            }
        }

        let payload = json!({
            "taskId": task.id,
            "assessmentId": assessment.id,
            "appId": req.app_id,
            "templateId": req.template_id,
            "frameworks": req.frameworks,
            "title": req.title,
            "tenantId": actor.tenant_id,
            "location": assessment.location,
        });
        self.store.set_payload(task.id, payload.clone())?;

        let status = if template.enrichment_enabled {
            match self.dispatcher.dispatch(TaskOp::CreateAssessments, task.id, payload)? {
                Dispatch::Sent { topic } => {
                    info!("tarea {} despachada a {topic}", task.id);
                    TaskStatus::Pending
                }
                // Degradación: la tarea queda pendiente y el sweeper la
                // recogerá si nadie la procesa.
                Dispatch::Skipped { .. } => TaskStatus::Pending,
            }
        } else {
            self.store.transition(task.id, TaskStatus::Processed)?;
            self.store.set_locked(assessment.id, false)?;
            TaskStatus::Processed
        };

        Ok(CreateAssessmentOutcome { assessment_id: assessment.id, task_id: task.id, status })
    }

    /// Retitula un assessment existente, con las mismas reglas de exclusión.
    pub fn update_assessment(
        &self,
        actor: &Actor,
        assessment_id: i32,
        title: String,
    ) -> Result<assess_domain::Assessment, EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("el título no puede ser vacío".into()));
        }
        let mut assessment = self.load_unlocked(actor, assessment_id)?;
        assessment.title = title;
        assessment.updated_by = actor.user_id;
        assessment.updated_on = Utc::now();
        self.store.save_assessment(&assessment)?;
        Ok(assessment)
    }

    fn validate_create(
        &self,
        actor: &Actor,
        req: &CreateAssessmentRequest,
    ) -> Result<(), EngineError> {
        if req.title.trim().is_empty() {
            return Err(EngineError::Validation("el título no puede ser vacío".into()));
        }
        if req.frameworks.is_empty() {
            return Err(EngineError::Validation("se requiere al menos un framework".into()));
        }
        for framework in &req.frameworks {
            if !self.license.allows_standard(*framework) {
                return Err(EngineError::Forbidden(format!(
                    "el estándar {framework} no está habilitado para la organización"
                )));
            }
        }
        if !self.license.allows_template(req.template_id) {
            return Err(EngineError::Validation(format!(
                "template {} no válido para la organización",
                req.template_id
            )));
        }
        if self.license.max_assessments_per_app > 0 {
            let count = self.store.count_assessments(&actor.tenant_id, req.app_id)?;
            if count >= self.license.max_assessments_per_app {
                return Err(EngineError::Forbidden(
                    "cuota de assessments agotada para la aplicación".into(),
                ));
            }
        }
        if self.store.any_locked(&actor.tenant_id, req.app_id)? {
            return Err(EngineError::Conflict(
                "ya hay una generación de assessment en curso para la aplicación".into(),
            ));
        }
        let cutoff = Utc::now() - Duration::seconds(PENDING_TASK_VISIBILITY_SECS);
        if self
            .store
            .find_active(&actor.tenant_id, req.app_id, TaskOp::assessment_ops(), cutoff)?
            .is_some()
        {
            return Err(EngineError::Conflict(
                "ya hay una tarea de assessment activa para la aplicación".into(),
            ));
        }
        Ok(())
    }

    /// Siembra outline (hasheado) y, si el template trae contenido usable,
    /// las secciones iniciales, todo en versión 0.
    fn seed_document(
        &self,
        actor: &Actor,
        req: &CreateAssessmentRequest,
        assessment_id: i32,
        template: &TemplateSpec,
    ) -> Result<(), EngineError> {
        let tree_value = serde_json::to_value(&template.outline)?;
        self.store.insert_outline(NewOutline {
            tenant_id: actor.tenant_id.clone(),
            app_id: req.app_id,
            assessment_id,
            version: INITIAL_VERSION,
            outline_hash: Some(content_hash(&tree_value)),
            tree: template.outline.clone(),
            created_by: actor.user_id,
        })?;
        if template.is_default || template.is_editable {
            let sections = template
                .sections
                .iter()
                .map(|seed| NewSection {
                    tenant_id: actor.tenant_id.clone(),
                    app_id: req.app_id,
                    assessment_id,
                    section_id: seed.section_id.clone(),
                    title: seed.title.clone(),
                    version: INITIAL_VERSION,
                    content: seed.content.clone(),
                    content_hash: Some(content_hash(&seed.content)),
                    copy_of: None,
                    created_by: actor.user_id,
                })
                .collect();
            self.store.insert_sections(sections)?;
        }
        Ok(())
    }
}
