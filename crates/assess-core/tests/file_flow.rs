//! Rama excel (copia de archivo) y reemplazo de archivo en dos fases.

use std::sync::Arc;

use assess_adapters::{MemoryObjectStore, MemoryQueue, StaticTemplateSource};
use assess_core::store::DocumentStore;
use assess_core::{
    Actor, AssessmentService, Dispatcher, EngineError, InMemoryStore, LicenseRule, ObjectStore,
    QueueConfig,
};
use assess_domain::TaskStatus;
use uuid::Uuid;

fn setup() -> (AssessmentService<InMemoryStore, MemoryQueue>, Arc<InMemoryStore>, Arc<MemoryObjectStore>, Actor)
{
    let store = Arc::new(InMemoryStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    objects.put("templates/base.xlsx", b"plantilla".to_vec()).expect("put");
    let templates = Arc::new(StaticTemplateSource::new());
    templates.register(StaticTemplateSource::sample_excel(8, "templates/base.xlsx"));
    let service = AssessmentService::new(
        store.clone(),
        Dispatcher::new(Arc::new(MemoryQueue::new()), QueueConfig::default()),
        objects.clone(),
        templates,
        LicenseRule::default(),
    );
    (service, store, objects, Actor { tenant_id: "acme".into(), user_id: Uuid::new_v4() })
}

#[test]
fn excel_creation_copies_file_and_seeds_no_outline() {
    let (service, store, objects, actor) = setup();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "Cuestionario".into(),
                app_id: 4,
                frameworks: vec![1],
                template_id: 8,
            },
        )
        .expect("crear");
    assert_eq!(outcome.status, TaskStatus::Processed);
    let assessment = store.get_assessment("acme", outcome.assessment_id).expect("assessment");
    assert!(!assessment.locked);
    let location = assessment.location.expect("location");
    assert!(objects.contains(&location), "el archivo copiado existe");
    // Sin outline: la rama excel no siembra documento estructurado.
    assert!(matches!(
        store.get_outline("acme", outcome.assessment_id),
        Err(EngineError::NotFound(_))
    ));
    // Descarga vía URL firmada.
    let url = service.download_location(&actor, outcome.assessment_id).expect("url");
    assert!(url.contains(&location));
}

#[test]
fn staged_upload_promotes_in_two_phases() {
    let (service, store, objects, actor) = setup();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "Cuestionario".into(),
                app_id: 4,
                frameworks: vec![1],
                template_id: 8,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    let old_location = store.get_assessment("acme", id).expect("assessment").location.expect("loc");
    objects.put("staging/nuevo.xlsx", b"reemplazo".to_vec()).expect("put");

    let staged = service.stage_upload(&actor, id, "staging/nuevo.xlsx".into()).expect("stage");
    assert_eq!(staged.temp_location.as_deref(), Some("staging/nuevo.xlsx"));
    assert_eq!(staged.location.as_deref(), Some(old_location.as_str()), "fase 1 no promueve");

    // Promover con lock tomado se rechaza.
    store.set_locked(id, true).expect("lock");
    assert!(matches!(service.promote_upload(&actor, id), Err(EngineError::Conflict(_))));
    store.set_locked(id, false).expect("unlock");

    let promoted = service.promote_upload(&actor, id).expect("promover");
    assert_eq!(promoted.location.as_deref(), Some("staging/nuevo.xlsx"));
    assert_eq!(promoted.temp_location, None);
    assert!(!objects.contains(&old_location), "el archivo anterior se borra");

    // Sin nada en staging, promover de nuevo es un error de validación.
    assert!(matches!(service.promote_upload(&actor, id), Err(EngineError::Validation(_))));
}
