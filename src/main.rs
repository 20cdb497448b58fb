//! Demo ejecutable del motor: recorre el ciclo completo sobre el stack en
//! memoria (creación síncrona, edición, diff, reversión, generación por cola
//! con cancelación y sweeper) y, opt-in, un smoke de persistencia Postgres.

use std::sync::Arc;

use assess_adapters::{MemoryObjectStore, MemoryQueue, StaticTemplateSource};
use assess_core::consumer::{run_consumer_once, CompletionConsumer};
use assess_core::service::{CreateAssessmentRequest, SectionUpdate};
use assess_core::store::{DocumentStore, TaskStore};
use assess_core::{
    Actor, AssessmentService, Dispatcher, EngineError, InMemoryStore, LicenseRule, QueueConfig,
    Sweeper,
};
use assess_domain::TaskStatus;
use serde_json::json;
use uuid::Uuid;

const REQUEST_TOPIC: &str = "assessment-requests";
const REPLY_TOPIC: &str = "assessment-replies";

fn main() {
    // Cargar variables de entorno desde .env si existe (antes de leer config)
    let _ = dotenvy::dotenv();
    env_logger::init();

    let actor = Actor { tenant_id: "demo".into(), user_id: Uuid::new_v4() };
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let templates = Arc::new(StaticTemplateSource::new());
    templates.register(StaticTemplateSource::sample_word(1, false));
    templates.register(StaticTemplateSource::sample_word(2, true));
    let config = QueueConfig::default().enabled(true).with_topic("assessment", REQUEST_TOPIC);
    let service = AssessmentService::new(
        store.clone(),
        Dispatcher::new(queue.clone(), config),
        objects,
        templates,
        LicenseRule::default(),
    );

    // --- Creación síncrona (template word sin enriquecimiento) ---
    let created = service
        .create_assessment(
            &actor,
            CreateAssessmentRequest {
                title: "SOC 2 anual".into(),
                app_id: 1,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("creación síncrona");
    assert_eq!(created.status, TaskStatus::Processed);
    println!("[demo] assessment {} creado inline (tarea {})", created.assessment_id, created.task_id);

    // --- Edición: hash detecta no-cambios, el commit versiona y snapshotea ---
    let id = created.assessment_id;
    let edit = service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "v1"}]})),
        )
        .expect("edición");
    println!("[demo] intro -> versión {} (history_ref {})", edit.updated[0].1, edit.history_ref);
    let same = service.update_section(
        &actor,
        id,
        SectionUpdate::new("intro", json!({"blocks": [{"text": "v1"}]})),
    );
    assert!(matches!(same, Err(EngineError::Conflict(_))), "sin cambios = conflicto");

    // --- Diff e historial ---
    let diff = service.section_diff(&actor, id, "intro", 0).expect("diff");
    println!("[demo] diff v{} -> v{} changed={}", diff.from_version, diff.to_version, diff.changed);

    // --- Reversión: restaurar avanza, nunca reescribe ---
    let restored = service.apply_section_version(&actor, id, "intro", 0).expect("revertir");
    assert_eq!(restored.copy_of, Some(0));
    println!("[demo] intro revertida a v0 como versión {}", restored.version);

    // --- Generación por cola: dispatch, completitud y carrera de cancelación ---
    let queued = service
        .create_assessment(
            &actor,
            CreateAssessmentRequest {
                title: "ISO 27001".into(),
                app_id: 2,
                frameworks: vec![5],
                template_id: 2,
            },
        )
        .expect("creación encolada");
    assert_eq!(queued.status, TaskStatus::Pending);
    println!("[demo] tarea {} en cola ({} mensaje/s)", queued.task_id, queue.depth(REQUEST_TOPIC));

    // El usuario cancela antes de que el worker responda.
    service.cancel_task(&actor, queued.task_id).expect("cancelar");
    // La completitud tardía del worker no resucita la tarea.
    let late = json!({"taskId": queued.task_id, "response": {"status": "success", "payload": {}}});
    queue.push_raw(REPLY_TOPIC, &late.to_string()).expect("push");
    let consumer = CompletionConsumer::new(store.clone());
    run_consumer_once(&consumer, &*queue, REPLY_TOPIC, 10).expect("drain");
    let task = TaskStore::get(&*store, queued.task_id).expect("tarea");
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(store.get_assessment("demo", queued.assessment_id).is_err(), "soft-delete compensó");
    println!("[demo] cancelación ganó la carrera; completitud tardía descartada");

    // --- Sweeper: tareas colgadas pasan a FAILED y liberan locks ---
    let stuck = service
        .create_assessment(
            &actor,
            CreateAssessmentRequest {
                title: "PCI".into(),
                app_id: 6,
                frameworks: vec![9],
                template_id: 2,
            },
        )
        .expect("creación encolada");
    let swept = Sweeper::new(chrono::Duration::seconds(-1)).sweep(&*store).expect("sweep");
    assert!(swept >= 1);
    assert!(!store.get_assessment("demo", stuck.assessment_id).expect("assessment").locked);
    println!("[demo] sweeper barrió {swept} tarea/s y liberó locks");

    // --- Listado de tareas recientes (la vista que sondea la UI) ---
    let recent = service.recent_tasks(&actor, None, 10, 0).expect("listado");
    println!("[demo] {} tareas registradas para el tenant", recent.len());

    println!("[demo] recorrido en memoria: OK");

    // Smoke Postgres – opt-in para no requerir una base en entornos de CI.
    #[cfg(feature = "pg_demo")]
    if std::env::var("ASSESSFLOW_RUN_PG_DEMO").ok().as_deref() == Some("1") {
        run_pg_demo(&actor);
    }
}

/// Smoke de persistencia: pool migrado + CAS de tareas contra Postgres.
#[cfg(feature = "pg_demo")]
fn run_pg_demo(actor: &Actor) {
    use assess_domain::TaskOp;
    use assess_persistence::pg::PgStore;

    let pool = assess_persistence::build_dev_pool_from_env().expect("pool");
    let store = PgStore::from_pool(pool);
    let task = store
        .insert(assess_core::store::NewTask {
            tenant_id: actor.tenant_id.clone(),
            app_id: 1,
            op: TaskOp::CreateAssessments,
            status: TaskStatus::Pending,
            request_payload: json!({}),
            entity_type: "assessment".into(),
            entity_id: "0".into(),
            created_by: actor.user_id,
        })
        .expect("insert");
    store.transition(task.id, TaskStatus::Cancelled).expect("cancel");
    let err = store.transition(task.id, TaskStatus::Processed).unwrap_err();
    println!("[pg_demo] transición sobre terminal rechazada: {err}");
}
