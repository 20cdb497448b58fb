//! Shape que el boundary de templates devuelve al orquestador.
//!
//! El renderizado/placeholder-substitution en sí es un colaborador externo:
//! aquí sólo se modela "dado un template, devolver outline + secciones".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outline::OutlineNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateKind {
    #[serde(rename = "word")]
    Word,
    #[serde(rename = "excel")]
    Excel,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Word => "word",
            TemplateKind::Excel => "excel",
        }
    }
}

/// Contenido inicial de una sección sembrada desde el template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSeed {
    pub section_id: String,
    pub title: String,
    pub content: Value,
}

/// Vista del template que el orquestador necesita para decidir la rama de
/// creación (síncrona / copia de archivo / sembrado + enriquecimiento).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub id: i32,
    pub name: String,
    pub kind: TemplateKind,
    pub is_default: bool,
    pub is_editable: bool,
    /// Si el template requiere enriquecimiento downstream (cola).
    pub enrichment_enabled: bool,
    /// Ubicación en object storage del archivo base (templates excel).
    pub location: Option<String>,
    pub outline: Vec<OutlineNode>,
    pub sections: Vec<SectionSeed>,
}
