//! Flujo de punta a punta sobre el stack en memoria: creación, edición con
//! detección de no-cambios, historial correlacionado, diff y reversión.

use std::sync::Arc;

use assess_adapters::{MemoryObjectStore, MemoryQueue, StaticTemplateSource};
use assess_core::service::SectionUpdate;
use assess_core::store::DocumentStore;
use assess_core::{
    content_hash, Actor, AssessmentService, Dispatcher, EngineError, InMemoryStore, LicenseRule,
    QueueConfig,
};
use assess_domain::{outline, TaskStatus};
use serde_json::json;
use uuid::Uuid;

fn actor() -> Actor {
    Actor { tenant_id: "acme".into(), user_id: Uuid::new_v4() }
}

fn service_with(
    license: LicenseRule,
    config: QueueConfig,
) -> (AssessmentService<InMemoryStore, MemoryQueue>, Arc<InMemoryStore>, Arc<MemoryQueue>) {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let templates = Arc::new(StaticTemplateSource::new());
    templates.register(StaticTemplateSource::sample_word(1, false));
    templates.register(StaticTemplateSource::sample_word(2, true));
    let service = AssessmentService::new(
        store.clone(),
        Dispatcher::new(queue.clone(), config),
        Arc::new(MemoryObjectStore::new()),
        templates,
        license,
    );
    (service, store, queue)
}

fn default_service() -> (AssessmentService<InMemoryStore, MemoryQueue>, Arc<InMemoryStore>) {
    let (service, store, _) = service_with(LicenseRule::default(), QueueConfig::default());
    (service, store)
}

#[test]
fn synchronous_word_creation_finishes_inline_and_unlocks() {
    let (service, store) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2 anual".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    assert_eq!(outcome.status, TaskStatus::Processed);
    let assessment = store.get_assessment("acme", outcome.assessment_id).expect("assessment");
    assert!(!assessment.locked);
    // Outline y secciones sembradas en versión 0, con hash persistido.
    let tree = service.fetch_section_tree(&actor, outcome.assessment_id).expect("árbol");
    assert_eq!(tree.outline.version, 0);
    assert!(tree.outline.outline_hash.is_some());
    assert_eq!(tree.sections.len(), 3);
    assert!(tree.sections.iter().all(|s| s.version == 0 && s.content_hash.is_some()));
}

#[test]
fn unchanged_content_is_a_conflict_and_leaves_no_trace() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let current = service
        .fetch_section_tree(&actor, outcome.assessment_id)
        .expect("árbol")
        .sections
        .into_iter()
        .find(|s| s.section_id == "intro")
        .expect("intro");
    // Mismo contenido que el sembrado: mismo hash, nada que hacer.
    let same = json!({"blocks": [{"text": "Propósito del assessment."}]});
    assert_eq!(content_hash(&same), current.content_hash.clone().unwrap());
    let err = service
        .update_section(
            &actor,
            outcome.assessment_id,
            SectionUpdate::new("intro", same),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert!(service.section_history(&actor, outcome.assessment_id, "intro").expect("hist").is_empty());
}

#[test]
fn edits_version_monotonically_and_correlate_history() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    let first = service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "v1"}]})),
        )
        .expect("edición 1");
    let second = service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "v2"}]})),
        )
        .expect("edición 2");
    assert_eq!(first.updated, vec![("intro".to_string(), 1)]);
    assert_eq!(second.updated, vec![("intro".to_string(), 2)]);

    let tree = service.fetch_section_tree(&actor, id).expect("árbol");
    assert_eq!(tree.outline.version, 2);
    assert_eq!(outline::find_node(&tree.outline.tree, "intro").expect("nodo").version, 2);
    // Sólo la sección editada subió de versión en el árbol.
    assert_eq!(outline::find_node(&tree.outline.tree, "controles").expect("nodo").version, 0);

    let history = service.section_history(&actor, id, "intro").expect("historial");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 0);
    assert_eq!(history[1].version, 1);
    // Cada snapshot de sección dereferencia el snapshot de outline de su
    // misma transacción.
    let outline_history = service.outline_history(&actor, id).expect("historial outline");
    for snap in &history {
        assert!(outline_history.iter().any(|o| o.id == snap.history_ref));
    }
    assert_ne!(history[0].history_ref, history[1].history_ref);
}

#[test]
fn batch_update_shares_one_outline_snapshot() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    let result = service
        .update_sections(
            &actor,
            id,
            vec![
                SectionUpdate::new("intro", json!({"blocks": [{"text": "x"}]})),
                // Sin cambio: debe omitirse sin error.
                SectionUpdate::new("intro.alcance", json!({"blocks": [{"text": "Sistemas cubiertos."}]})),
                SectionUpdate::new("controles", json!({"blocks": [{"text": "y"}]})),
            ],
        )
        .expect("lote");
    assert_eq!(result.updated.len(), 2);

    let outline_history = service.outline_history(&actor, id).expect("historial outline");
    assert_eq!(outline_history.len(), 1, "un solo snapshot de outline para el lote");
    let h1 = service.section_history(&actor, id, "intro").expect("hist");
    let h2 = service.section_history(&actor, id, "controles").expect("hist");
    assert_eq!(h1[0].history_ref, h2[0].history_ref);
    assert!(service.section_history(&actor, id, "intro.alcance").expect("hist").is_empty());
}

#[test]
fn diff_reads_history_and_falls_back_to_live_row() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    for v in ["v1", "v2"] {
        service
            .update_section(
                &actor,
                id,
                SectionUpdate::new("intro", json!({"blocks": [{"text": v}]})),
            )
            .expect("edición");
    }
    // v0 -> v1: ambos lados salen del historial.
    let diff = service.section_diff(&actor, id, "intro", 0).expect("diff");
    assert_eq!(diff.after, json!({"blocks": [{"text": "v1"}]}));
    assert!(diff.changed);
    // v1 -> v2: la sucesora es la fila viva.
    let diff = service.section_diff(&actor, id, "intro", 1).expect("diff");
    assert_eq!(diff.to_version, 2);
    assert_eq!(diff.after, json!({"blocks": [{"text": "v2"}]}));
    // Versión inexistente.
    let err = service.section_diff(&actor, id, "intro", 9).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn reversion_restores_content_by_advancing() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    let original = json!({"blocks": [{"text": "Propósito del assessment."}]});
    service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "editado"}]})),
        )
        .expect("edición");

    let restored = service.apply_section_version(&actor, id, "intro", 0).expect("revertir");
    assert_eq!(restored.version, 2, "revertir avanza, no retrocede");
    assert_eq!(restored.copy_of, Some(0));
    assert_eq!(restored.content, original);
    assert_eq!(restored.content_hash.as_deref(), Some(content_hash(&original).as_str()));
    // El estado pre-reversión quedó en el historial.
    let history = service.section_history(&actor, id, "intro").expect("historial");
    assert_eq!(history.last().expect("snapshot").version, 1);
    // Una edición posterior limpia el marcador de reversión.
    let _ = service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "post"}]})),
        )
        .expect("edición");
    let live = service
        .fetch_section_tree(&actor, id)
        .expect("árbol")
        .sections
        .into_iter()
        .find(|s| s.section_id == "intro")
        .expect("intro");
    assert_eq!(live.copy_of, None);
    assert_eq!(live.version, 3);
}

#[test]
fn license_and_quota_gate_creation() {
    let license = LicenseRule {
        max_assessments_per_app: 1,
        available_standards: vec![2],
        available_templates: vec![1],
    };
    let (service, _, _) = service_with(license, QueueConfig::default());
    let actor = actor();
    // Estándar fuera de la licencia.
    let err = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "PCI".into(),
                app_id: 7,
                frameworks: vec![99],
                template_id: 1,
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    // Template fuera del catálogo habilitado.
    let err = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 2,
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    // Primera creación consume la cuota; la segunda se rechaza.
    service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let err = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2 bis".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

#[test]
fn edit_can_record_its_base_version() {
    let (service, _) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    let id = outcome.assessment_id;
    // El cliente declara que editó partiendo de la versión 0.
    service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "v1"}]})).based_on(0),
        )
        .expect("edición con base");
    let live = service
        .fetch_section_tree(&actor, id)
        .expect("árbol")
        .sections
        .into_iter()
        .find(|s| s.section_id == "intro")
        .expect("intro");
    assert_eq!(live.version, 1);
    assert_eq!(live.copy_of, Some(0));
    // Una edición sin base declarada limpia el marcador.
    service
        .update_section(
            &actor,
            id,
            SectionUpdate::new("intro", json!({"blocks": [{"text": "v2"}]})),
        )
        .expect("edición sin base");
    let live = service
        .fetch_section_tree(&actor, id)
        .expect("árbol")
        .sections
        .into_iter()
        .find(|s| s.section_id == "intro")
        .expect("intro");
    assert_eq!(live.copy_of, None);
}

#[test]
fn section_tree_follows_document_order() {
    use assess_core::store::{NewAssessment, NewOutline, NewSection};
    use assess_domain::outline::OutlineNode;

    let (service, store) = default_service();
    let actor = actor();
    let assessment = store
        .insert_assessment(NewAssessment {
            title: "Manual".into(),
            tenant_id: actor.tenant_id.clone(),
            app_id: 7,
            frameworks: vec![2],
            template_id: 1,
            kind: None,
            locked: false,
            location: None,
            created_by: actor.user_id,
        })
        .expect("assessment");
    let tree = vec![
        OutlineNode {
            children: vec![OutlineNode::leaf("intro.alcance", 2, "Alcance")],
            ..OutlineNode::leaf("intro", 1, "Introducción")
        },
        OutlineNode::leaf("controles", 1, "Controles"),
    ];
    store
        .insert_outline(NewOutline {
            tenant_id: actor.tenant_id.clone(),
            app_id: 7,
            assessment_id: assessment.id,
            version: 0,
            outline_hash: None,
            tree,
            created_by: actor.user_id,
        })
        .expect("outline");
    // Filas sembradas en orden inverso al del documento.
    let rows = ["controles", "intro.alcance", "intro"]
        .into_iter()
        .map(|section_id| NewSection {
            tenant_id: actor.tenant_id.clone(),
            app_id: 7,
            assessment_id: assessment.id,
            section_id: section_id.into(),
            title: section_id.into(),
            version: 0,
            content: json!({"blocks": []}),
            content_hash: None,
            copy_of: None,
            created_by: actor.user_id,
        })
        .collect();
    store.insert_sections(rows).expect("secciones");

    let tree = service.fetch_section_tree(&actor, assessment.id).expect("árbol");
    let ids: Vec<&str> = tree.sections.iter().map(|s| s.section_id.as_str()).collect();
    assert_eq!(ids, vec!["intro", "intro.alcance", "controles"], "preorden del outline");
}

#[test]
fn locked_assessment_rejects_writes() {
    let (service, store) = default_service();
    let actor = actor();
    let outcome = service
        .create_assessment(
            &actor,
            assess_core::service::CreateAssessmentRequest {
                title: "SOC 2".into(),
                app_id: 7,
                frameworks: vec![2],
                template_id: 1,
            },
        )
        .expect("crear");
    store.set_locked(outcome.assessment_id, true).expect("lock");
    let err = service
        .update_section(
            &actor,
            outcome.assessment_id,
            SectionUpdate::new("intro", json!({"blocks": []})),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    let err = service.apply_section_version(&actor, outcome.assessment_id, "intro", 0).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}
