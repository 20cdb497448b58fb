//! assess-adapters: implementaciones en memoria de los boundaries del motor.
//!
//! Este crate provee:
//! - `MemoryQueue`: cola por topic con handles de borrado (semántica
//!   recibir-sin-borrar = reentrega).
//! - `MemoryObjectStore`: object storage clave → bytes con URLs "firmadas"
//!   sintéticas.
//! - `StaticTemplateSource`: catálogo fijo de templates para tests y demo.
//!
//! Las implementaciones reales (broker gestionado, bucket, catálogo por
//! tenant) viven fuera del workspace; el motor sólo ve los traits.

pub mod objects;
pub mod queue;
pub mod templates;

pub use objects::MemoryObjectStore;
pub use queue::MemoryQueue;
pub use templates::StaticTemplateSource;
