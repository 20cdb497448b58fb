//! Cancelación de tareas por el usuario y sus compensaciones por operación.
//!
//! CANCELLED sólo se alcanza por esta vía. La transición es compare-and-set:
//! si el worker terminó primero, la cancelación pierde la carrera y devuelve
//! conflicto en lugar de pisar un estado terminal.

use assess_domain::{Task, TaskOp, TaskStatus};
use log::info;

use crate::errors::EngineError;
use crate::queue::QueueClient;
use crate::service::{Actor, AssessmentService};
use crate::store::{DocumentStore, TaskStore};

impl<S, Q> AssessmentService<S, Q>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    /// Cancela la tarea y deshace sus efectos visibles según la operación.
    pub fn cancel_task(&self, actor: &Actor, task_id: i64) -> Result<Task, EngineError> {
        let task = TaskStore::get(&*self.store, task_id)?;
        if task.tenant_id != actor.tenant_id {
            return Err(EngineError::NotFound(format!("tarea {task_id}")));
        }
        let cancelled = self.store.transition(task_id, TaskStatus::Cancelled)?;
        info!("tarea {task_id} cancelada por {}", actor.user_id);

        match task.op {
            // El assessment a medio generar no debe quedar visible ni
            // bloqueado.
            TaskOp::CreateAssessments => {
                if let Ok(assessment_id) = task.entity_id.parse::<i32>() {
                    self.store.soft_delete_assessment(&actor.tenant_id, assessment_id)?;
                }
            }
            // La entidad preexiste: se conserva, sólo se libera el lock.
            TaskOp::UpdateAssessments => {
                if let Ok(assessment_id) = task.entity_id.parse::<i32>() {
                    self.store.set_locked(assessment_id, false)?;
                }
            }
            // Los assets creados/tocados hasta el momento se conservan.
            TaskOp::CreateAssets | TaskOp::UpdateAssets => {}
            TaskOp::UpdateCompliance => {
                self.store.mark_compliance_pending(&actor.tenant_id, task.app_id)?;
            }
            TaskOp::ExportTrustCenter => {
                if let Ok(export_id) = task.entity_id.parse::<i64>() {
                    self.store.cancel_export(&actor.tenant_id, export_id)?;
                }
            }
            TaskOp::ControlEvaluation | TaskOp::CreatePolicy | TaskOp::UpdatePolicy => {}
        }
        Ok(cancelled)
    }
}
