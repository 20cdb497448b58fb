//! Boundaries hacia colaboradores externos: object storage y el catálogo de
//! templates. El motor sólo depende de estos traits; `assess-adapters` provee
//! implementaciones en memoria y las reales viven fuera del workspace.

use assess_domain::TemplateSpec;

use crate::errors::EngineError;

/// Object storage (archivos generados, templates excel, exports).
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), EngineError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, EngineError>;
    /// Copia server-side; no descarga los bytes.
    fn copy(&self, from: &str, to: &str) -> Result<(), EngineError>;
    fn delete(&self, keys: &[String]) -> Result<(), EngineError>;
    /// URL firmada de descarga, con expiración corta decidida por la
    /// implementación.
    fn signed_url(&self, key: &str) -> Result<String, EngineError>;
}

/// Resolución de templates por id, ya filtrados por tenant aguas arriba.
pub trait TemplateSource: Send + Sync {
    fn template(&self, template_id: i32) -> Result<TemplateSpec, EngineError>;
}
