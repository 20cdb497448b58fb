//! Consumer de mensajes de completitud de los workers downstream.
//!
//! Shape entrante: `{"taskId": N, "response": {"status": "...", "payload": …}}`.
//! La transición de estado es compare-and-set: si la tarea ya quedó terminal
//! (típicamente cancelada por el usuario), la completitud tardía se registra
//! y se descarta sin resucitar la tarea.

use std::sync::Arc;

use assess_domain::{TaskOp, TaskStatus};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;
use crate::queue::{QueueClient, QueueMessage};
use crate::store::{DocumentStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "in_process")]
    InProcess,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub status: CompletionStatus,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    #[serde(rename = "taskId")]
    pub task_id: i64,
    pub response: CompletionResponse,
}

/// Qué hacer con el mensaje tras procesarlo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Borrar de la cola (procesado o descartado a propósito).
    Delete,
    /// Dejar en la cola para reentrega.
    Retry,
}

pub struct CompletionConsumer<S> {
    store: Arc<S>,
}

impl<S: DocumentStore + TaskStore> CompletionConsumer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Aplica una completitud al estado de tareas y locks.
    pub fn handle(&self, completion: &TaskCompletion) -> Result<Ack, EngineError> {
        let task = match TaskStore::get(&*self.store, completion.task_id) {
            Ok(t) => t,
            Err(EngineError::NotFound(_)) => {
                warn!("completitud para tarea inexistente {}", completion.task_id);
                return Ok(Ack::Delete);
            }
            Err(e) => return Err(e),
        };
        let to = match completion.response.status {
            CompletionStatus::InProcess => TaskStatus::InProcess,
            CompletionStatus::Success => TaskStatus::Processed,
            CompletionStatus::Failed => TaskStatus::Failed,
        };
        match self.store.transition(task.id, to) {
            Ok(_) => {}
            Err(EngineError::Conflict(msg)) => {
                // Carrera perdida contra una cancelación (u otra terminal):
                // el mensaje se descarta, la tarea no revive.
                warn!("completitud tardía descartada: {msg}");
                return Ok(Ack::Delete);
            }
            Err(e) => return Err(e),
        }
        // Un avance intermedio conserva el lock; sólo las terminales liberan.
        if to.is_terminal() && TaskOp::assessment_ops().contains(&task.op) {
            if let Ok(assessment_id) = task.entity_id.parse::<i32>() {
                self.store.set_locked(assessment_id, false)?;
            }
        }
        Ok(Ack::Delete)
    }
}

/// Drena hasta `max` mensajes del topic y los aplica. Mensajes malformados se
/// borran con warning; errores de infraestructura dejan el mensaje en la cola.
pub fn run_consumer_once<S, Q>(
    consumer: &CompletionConsumer<S>,
    queue: &Q,
    topic: &str,
    max: usize,
) -> Result<usize, EngineError>
where
    S: DocumentStore + TaskStore,
    Q: QueueClient,
{
    let messages = queue.receive(topic, max)?;
    let mut handled = 0;
    for message in &messages {
        match serde_json::from_str::<TaskCompletion>(&message.body) {
            Ok(completion) => match consumer.handle(&completion) {
                Ok(Ack::Delete) => {
                    queue.delete(topic, message)?;
                    handled += 1;
                }
                Ok(Ack::Retry) => {}
                Err(e) if e.is_permanent() => {
                    warn!("completitud rechazada ({e}); mensaje descartado");
                    queue.delete(topic, message)?;
                }
                Err(e) => {
                    warn!("fallo transitorio procesando completitud: {e}");
                }
            },
            Err(e) => {
                warn!("mensaje malformado en {topic} ({e}); se descarta");
                queue.delete(topic, message)?;
            }
        }
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_parses_wire_field_names() {
        let raw = r#"{"taskId": 9, "response": {"status": "success", "payload": {"ok": true}}}"#;
        let c: TaskCompletion = serde_json::from_str(raw).unwrap();
        assert_eq!(c.task_id, 9);
        assert_eq!(c.response.status, CompletionStatus::Success);
        assert_eq!(c.response.payload, json!({"ok": true}));
    }

    #[test]
    fn payload_defaults_to_null() {
        let raw = r#"{"taskId": 3, "response": {"status": "failed"}}"#;
        let c: TaskCompletion = serde_json::from_str(raw).unwrap();
        assert_eq!(c.response.payload, Value::Null);
    }
}
