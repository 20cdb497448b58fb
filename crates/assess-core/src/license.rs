//! Reglas de licenciamiento evaluadas en la creación de assessments.

/// Límites y catálogos habilitados para la organización. Una lista vacía
/// significa "sin restricción"; `max_assessments_per_app == 0` significa
/// cuota ilimitada.
#[derive(Debug, Clone, Default)]
pub struct LicenseRule {
    pub max_assessments_per_app: i64,
    pub available_standards: Vec<i64>,
    pub available_templates: Vec<i32>,
}

impl LicenseRule {
    pub fn allows_standard(&self, standard: i64) -> bool {
        self.available_standards.is_empty() || self.available_standards.contains(&standard)
    }

    pub fn allows_template(&self, template_id: i32) -> bool {
        self.available_templates.is_empty() || self.available_templates.contains(&template_id)
    }
}
