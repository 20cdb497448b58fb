//! Cola de mensajes: trait de cliente, wire shapes y el dispatcher con
//! degradación controlada.
//!
//! Shape saliente: `{"id": "<task_id>", "body": {"type": "<tag>", "payload": …}}`.
//! El `id` correlaciona la respuesta del worker con la tarea persistida.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use assess_domain::TaskOp;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub body: MessageBody,
}

/// Mensaje recibido de la cola, con su handle de borrado.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

pub trait QueueClient: Send + Sync {
    fn send(&self, topic: &str, message: &OutboundMessage) -> Result<(), EngineError>;
    fn receive(&self, topic: &str, max: usize) -> Result<Vec<QueueMessage>, EngineError>;
    /// Borra el mensaje (ack). Un mensaje no borrado vuelve a entregarse.
    fn delete(&self, topic: &str, message: &QueueMessage) -> Result<(), EngineError>;
}

/// Habilitación global y mapeo wire-tag -> topic.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    pub enabled: bool,
    topics: HashMap<String, String>,
}

impl QueueConfig {
    /// Lee `QUEUE_ENABLED` y un topic por clase de operación
    /// (`ASSESSMENT_QUEUE`, `ARTIFACTS_QUEUE`, `COMPLIANCE_QUEUE`,
    /// `TRUST_CENTER_QUEUE`, `CONTROL_EVALUATION_QUEUE`, `POLICY_QUEUE`).
    pub fn from_env() -> Self {
        let enabled = env::var("QUEUE_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let mut cfg = QueueConfig { enabled, topics: HashMap::new() };
        for (tag, var) in [
            ("assessment", "ASSESSMENT_QUEUE"),
            ("artifacts", "ARTIFACTS_QUEUE"),
            ("compliance", "COMPLIANCE_QUEUE"),
            ("trust-center", "TRUST_CENTER_QUEUE"),
            ("control-evaluation", "CONTROL_EVALUATION_QUEUE"),
            ("policy", "POLICY_QUEUE"),
        ] {
            if let Ok(topic) = env::var(var) {
                cfg.topics.insert(tag.to_string(), topic);
            }
        }
        cfg
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_topic(mut self, tag: &str, topic: &str) -> Self {
        self.topics.insert(tag.to_string(), topic.to_string());
        self
    }

    pub fn topic_for(&self, op: TaskOp) -> Option<&str> {
        self.topics.get(op.wire_tag()).map(String::as_str)
    }
}

/// Resultado de un intento de dispatch. `Skipped` nunca es un error: el
/// llamador decide si completa el trabajo inline o deja la tarea pendiente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Sent { topic: String },
    Skipped { reason: &'static str },
}

pub struct Dispatcher<Q: QueueClient> {
    client: Arc<Q>,
    config: QueueConfig,
}

impl<Q: QueueClient> Dispatcher<Q> {
    pub fn new(client: Arc<Q>, config: QueueConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Publica `{id, body: {type, payload}}` en el topic de la operación.
    pub fn dispatch(
        &self,
        op: TaskOp,
        task_id: i64,
        payload: Value,
    ) -> Result<Dispatch, EngineError> {
        if !self.config.enabled {
            warn!("cola deshabilitada; no se despacha la tarea {task_id} ({:?})", op);
            return Ok(Dispatch::Skipped { reason: "cola deshabilitada" });
        }
        let Some(topic) = self.config.topic_for(op) else {
            warn!("sin topic configurado para {:?}; tarea {task_id} sin despachar", op);
            return Ok(Dispatch::Skipped { reason: "sin topic" });
        };
        let message = OutboundMessage {
            id: task_id.to_string(),
            body: MessageBody { kind: op.wire_tag().to_string(), payload },
        };
        self.client.send(topic, &message)?;
        Ok(Dispatch::Sent { topic: topic.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_shape_uses_type_key() {
        let msg = OutboundMessage {
            id: "41".into(),
            body: MessageBody { kind: "assessment".into(), payload: json!({"a": 1}) },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["id"], "41");
        assert_eq!(v["body"]["type"], "assessment");
        assert_eq!(v["body"]["payload"]["a"], 1);
    }
}
