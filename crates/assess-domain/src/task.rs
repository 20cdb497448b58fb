//! Tareas de fondo y su máquina de estados.
//!
//! Ciclo de vida: PENDING -> IN_PROCESS -> PROCESSED | FAILED. CANCELLED es
//! alcanzable desde PENDING/IN_PROCESS sólo por acción explícita del usuario,
//! nunca desde el consumer de la cola. Los estados terminales son absorbentes:
//! una transición que parte de un estado terminal debe rechazarse (esto cierra
//! la carrera entre cancelación y un mensaje de completitud tardío).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Clase de operación que la tarea representa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOp {
    #[serde(rename = "CREATE_ASSESSMENTS")]
    CreateAssessments,
    #[serde(rename = "UPDATE_ASSESSMENTS")]
    UpdateAssessments,
    #[serde(rename = "CREATE_ASSETS")]
    CreateAssets,
    #[serde(rename = "UPDATE_ASSETS")]
    UpdateAssets,
    #[serde(rename = "UPDATE_COMPLIANCE")]
    UpdateCompliance,
    #[serde(rename = "EXPORT_TRUST_CENTER")]
    ExportTrustCenter,
    #[serde(rename = "CONTROL_EVALUATION")]
    ControlEvaluation,
    #[serde(rename = "CREATE_POLICY")]
    CreatePolicy,
    #[serde(rename = "UPDATE_POLICY")]
    UpdatePolicy,
}

impl TaskOp {
    /// Operaciones que bloquean la creación de assessments para la misma
    /// aplicación (a lo sumo una generación en vuelo por app).
    pub fn assessment_ops() -> &'static [TaskOp] {
        &[TaskOp::CreateAssessments, TaskOp::UpdateAssessments]
    }

    /// Nombre persistido (columna varchar).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOp::CreateAssessments => "CREATE_ASSESSMENTS",
            TaskOp::UpdateAssessments => "UPDATE_ASSESSMENTS",
            TaskOp::CreateAssets => "CREATE_ASSETS",
            TaskOp::UpdateAssets => "UPDATE_ASSETS",
            TaskOp::UpdateCompliance => "UPDATE_COMPLIANCE",
            TaskOp::ExportTrustCenter => "EXPORT_TRUST_CENTER",
            TaskOp::ControlEvaluation => "CONTROL_EVALUATION",
            TaskOp::CreatePolicy => "CREATE_POLICY",
            TaskOp::UpdatePolicy => "UPDATE_POLICY",
        }
    }

    /// Tag estable usado en el wire shape `{type, payload}` de la cola.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            TaskOp::CreateAssessments | TaskOp::UpdateAssessments => "assessment",
            TaskOp::CreateAssets | TaskOp::UpdateAssets => "artifacts",
            TaskOp::UpdateCompliance => "compliance",
            TaskOp::ExportTrustCenter => "trust-center",
            TaskOp::ControlEvaluation => "control-evaluation",
            TaskOp::CreatePolicy | TaskOp::UpdatePolicy => "policy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROCESS")]
    InProcess,
    #[serde(rename = "PROCESSED")]
    Processed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Processed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Estados que cuentan como trabajo pendiente (bloquean operaciones
    /// nuevas sobre la misma entidad).
    pub fn active() -> &'static [TaskStatus] {
        &[TaskStatus::Pending, TaskStatus::InProcess]
    }

    /// Nombre persistido (columna varchar y payloads de cola).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProcess => "IN_PROCESS",
            TaskStatus::Processed => "PROCESSED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for TaskOp {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_ASSESSMENTS" => Ok(TaskOp::CreateAssessments),
            "UPDATE_ASSESSMENTS" => Ok(TaskOp::UpdateAssessments),
            "CREATE_ASSETS" => Ok(TaskOp::CreateAssets),
            "UPDATE_ASSETS" => Ok(TaskOp::UpdateAssets),
            "UPDATE_COMPLIANCE" => Ok(TaskOp::UpdateCompliance),
            "EXPORT_TRUST_CENTER" => Ok(TaskOp::ExportTrustCenter),
            "CONTROL_EVALUATION" => Ok(TaskOp::ControlEvaluation),
            "CREATE_POLICY" => Ok(TaskOp::CreatePolicy),
            "UPDATE_POLICY" => Ok(TaskOp::UpdatePolicy),
            other => Err(crate::DomainError::Validation(format!("operación desconocida: {other}"))),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROCESS" => Ok(TaskStatus::InProcess),
            "PROCESSED" => Ok(TaskStatus::Processed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(crate::DomainError::Validation(format!("estado desconocido: {other}"))),
        }
    }
}

/// Registro de una tarea de fondo. `request_payload` es opaco para el store:
/// se usa para el dispatch a la cola y la correlación posterior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub tenant_id: String,
    pub app_id: i64,
    pub op: TaskOp,
    pub status: TaskStatus,
    pub request_payload: Value,
    /// Referencia blanda a la entidad que la tarea frontea (no FK dura: una
    /// tarea puede referenciar otras clases de entidad).
    pub entity_type: String,
    pub entity_id: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_the_three_expected() {
        assert!(TaskStatus::Processed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProcess.is_terminal());
    }

    #[test]
    fn op_serializes_with_stable_screaming_case() {
        let json = serde_json::to_string(&TaskOp::ExportTrustCenter).unwrap();
        assert_eq!(json, "\"EXPORT_TRUST_CENTER\"");
    }
}
