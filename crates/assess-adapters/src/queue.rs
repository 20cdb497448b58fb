//! Cola en memoria con la misma semántica observable que un broker real:
//! `receive` no consume; sólo `delete` (ack) saca el mensaje del topic.

use std::collections::HashMap;
use std::sync::Mutex;

use assess_core::{EngineError, OutboundMessage, QueueClient, QueueMessage};

#[derive(Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<String, Vec<QueueMessage>>>,
    counter: Mutex<u64>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encola un cuerpo crudo, como haría un worker externo respondiendo.
    pub fn push_raw(&self, topic: &str, body: &str) -> Result<(), EngineError> {
        let id = self.next_id()?;
        let mut topics = self.lock_topics()?;
        topics.entry(topic.to_string()).or_default().push(QueueMessage {
            message_id: id.clone(),
            receipt_handle: format!("rh-{id}"),
            body: body.to_string(),
        });
        Ok(())
    }

    /// Mensajes aún no ackeados en el topic.
    pub fn depth(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .map(|t| t.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn next_id(&self) -> Result<String, EngineError> {
        let mut c = self
            .counter
            .lock()
            .map_err(|_| EngineError::Infrastructure("cola envenenada".into()))?;
        *c += 1;
        Ok(format!("m-{c}"))
    }

    fn lock_topics(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<QueueMessage>>>, EngineError> {
        self.topics
            .lock()
            .map_err(|_| EngineError::Infrastructure("cola envenenada".into()))
    }
}

impl QueueClient for MemoryQueue {
    fn send(&self, topic: &str, message: &OutboundMessage) -> Result<(), EngineError> {
        let body = serde_json::to_string(message)
            .map_err(|e| EngineError::Infrastructure(e.to_string()))?;
        self.push_raw(topic, &body)
    }

    fn receive(&self, topic: &str, max: usize) -> Result<Vec<QueueMessage>, EngineError> {
        let topics = self.lock_topics()?;
        Ok(topics
            .get(topic)
            .map(|msgs| msgs.iter().take(max).cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&self, topic: &str, message: &QueueMessage) -> Result<(), EngineError> {
        let mut topics = self.lock_topics()?;
        if let Some(msgs) = topics.get_mut(topic) {
            msgs.retain(|m| m.receipt_handle != message.receipt_handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receive_does_not_consume_until_delete() {
        let q = MemoryQueue::new();
        q.push_raw("t", "{}").unwrap();
        assert_eq!(q.receive("t", 10).unwrap().len(), 1);
        assert_eq!(q.depth("t"), 1);
        let msg = q.receive("t", 10).unwrap().remove(0);
        q.delete("t", &msg).unwrap();
        assert_eq!(q.depth("t"), 0);
    }

    #[test]
    fn send_serializes_outbound_shape() {
        let q = MemoryQueue::new();
        q.send(
            "t",
            &OutboundMessage {
                id: "5".into(),
                body: assess_core::queue::MessageBody {
                    kind: "assessment".into(),
                    payload: json!({"x": 1}),
                },
            },
        )
        .unwrap();
        let msg = q.receive("t", 1).unwrap().remove(0);
        let v: serde_json::Value = serde_json::from_str(&msg.body).unwrap();
        assert_eq!(v["body"]["type"], "assessment");
    }
}
