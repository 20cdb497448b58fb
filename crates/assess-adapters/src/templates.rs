//! Catálogo estático de templates. Los builders de ejemplo arman specs
//! plausibles (outline de dos niveles, secciones sembradas) para la demo y
//! los tests del motor.

use std::collections::HashMap;
use std::sync::Mutex;

use assess_core::{EngineError, TemplateSource};
use assess_domain::{OutlineNode, SectionSeed, TemplateKind, TemplateSpec};
use serde_json::json;

#[derive(Default)]
pub struct StaticTemplateSource {
    templates: Mutex<HashMap<i32, TemplateSpec>>,
}

impl StaticTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: TemplateSpec) {
        if let Ok(mut templates) = self.templates.lock() {
            templates.insert(spec.id, spec);
        }
    }

    /// Template word por defecto con outline de dos niveles y secciones
    /// sembradas.
    pub fn sample_word(id: i32, enrichment_enabled: bool) -> TemplateSpec {
        let mut intro = OutlineNode::leaf("intro", 1, "0");
        intro.children.push(OutlineNode::leaf("intro.alcance", 2, "0_0"));
        let controles = OutlineNode::leaf("controles", 1, "1");
        TemplateSpec {
            id,
            name: format!("Plantilla Word {id}"),
            kind: TemplateKind::Word,
            is_default: true,
            is_editable: true,
            enrichment_enabled,
            location: None,
            outline: vec![intro, controles],
            sections: vec![
                SectionSeed {
                    section_id: "intro".into(),
                    title: "Introducción".into(),
                    content: json!({"blocks": [{"text": "Propósito del assessment."}]}),
                },
                SectionSeed {
                    section_id: "intro.alcance".into(),
                    title: "Alcance".into(),
                    content: json!({"blocks": [{"text": "Sistemas cubiertos."}]}),
                },
                SectionSeed {
                    section_id: "controles".into(),
                    title: "Controles".into(),
                    content: json!({"blocks": []}),
                },
            ],
        }
    }

    /// Template excel con archivo base en el object store.
    pub fn sample_excel(id: i32, location: &str) -> TemplateSpec {
        TemplateSpec {
            id,
            name: format!("Plantilla Excel {id}"),
            kind: TemplateKind::Excel,
            is_default: false,
            is_editable: false,
            enrichment_enabled: false,
            location: Some(location.to_string()),
            outline: Vec::new(),
            sections: Vec::new(),
        }
    }
}

impl TemplateSource for StaticTemplateSource {
    fn template(&self, template_id: i32) -> Result<TemplateSpec, EngineError> {
        let templates = self
            .templates
            .lock()
            .map_err(|_| EngineError::Infrastructure("catálogo envenenado".into()))?;
        templates
            .get(&template_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("template {template_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_resolve() {
        let source = StaticTemplateSource::new();
        source.register(StaticTemplateSource::sample_word(3, false));
        let spec = source.template(3).unwrap();
        assert_eq!(spec.kind, TemplateKind::Word);
        assert_eq!(spec.sections.len(), 3);
    }

    #[test]
    fn unknown_template_is_not_found() {
        let source = StaticTemplateSource::new();
        assert!(matches!(source.template(99), Err(EngineError::NotFound(_))));
    }
}
