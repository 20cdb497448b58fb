//! Barrido de tareas colgadas: toda tarea activa que nadie tocó dentro de la
//! ventana pasa a FAILED y sus locks de assessment se liberan, para que una
//! caída del worker no deje la aplicación bloqueada para siempre.

use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use assess_domain::TaskOp;
use chrono::{Duration, Utc};
use log::{info, warn};

use crate::constants::DEFAULT_STUCK_TASK_AGE_SECS;
use crate::errors::EngineError;
use crate::store::{DocumentStore, TaskStore};

pub struct Sweeper {
    max_age: Duration,
}

impl Default for Sweeper {
    fn default() -> Self {
        Self { max_age: Duration::seconds(DEFAULT_STUCK_TASK_AGE_SECS) }
    }
}

impl Sweeper {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Una pasada. Devuelve cuántas tareas se marcaron FAILED.
    pub fn sweep<S: DocumentStore + TaskStore>(&self, store: &S) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - self.max_age;
        let swept = store.fail_stuck(cutoff)?;
        for task in &swept {
            info!("tarea {} colgada; marcada FAILED", task.id);
            if TaskOp::assessment_ops().contains(&task.op) {
                if let Ok(assessment_id) = task.entity_id.parse::<i32>() {
                    if let Err(e) = store.set_locked(assessment_id, false) {
                        warn!("no se pudo liberar el lock del assessment {assessment_id}: {e}");
                    }
                }
            }
        }
        Ok(swept.len())
    }

    /// Loop bloqueante con el intervalo dado. Errores de una pasada se
    /// loguean y no cortan el loop.
    pub fn run<S: DocumentStore + TaskStore>(&self, store: Arc<S>, interval: StdDuration) -> ! {
        loop {
            match self.sweep(&*store) {
                Ok(0) => {}
                Ok(n) => info!("sweeper: {n} tareas barridas"),
                Err(e) => warn!("sweeper: pasada fallida: {e}"),
            }
            thread::sleep(interval);
        }
    }
}
