//! Motor de assessments: hashing de contenido, stores (traits + impl en
//! memoria), orquestación de tareas de fondo y el servicio de alto nivel.
//!
//! El crate es agnóstico de persistencia: `assess-persistence` implementa los
//! mismos traits sobre Postgres y los tests de paridad corren contra ambos
//! backends.

pub mod constants;
pub mod consumer;
pub mod errors;
pub mod external;
pub mod hashing;
pub mod license;
pub mod queue;
pub mod service;
pub mod store;
pub mod sweeper;

pub use consumer::{Ack, CompletionConsumer, CompletionStatus, TaskCompletion};
pub use errors::EngineError;
pub use external::{ObjectStore, TemplateSource};
pub use hashing::{content_hash, hash_str, to_canonical_json};
pub use license::LicenseRule;
pub use queue::{Dispatch, Dispatcher, OutboundMessage, QueueClient, QueueConfig, QueueMessage};
pub use service::{Actor, AssessmentService};
pub use store::{DocumentStore, InMemoryStore, TaskStore};
pub use sweeper::Sweeper;
