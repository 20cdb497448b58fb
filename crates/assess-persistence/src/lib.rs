//! assess-persistence
//!
//! Implementaciones Postgres (Diesel) de `DocumentStore` y `TaskStore` con
//! paridad 1:1 respecto al backend en memoria de assess-core, más utilidades
//! de conexión y migraciones embebidas.
//!
//! Módulos:
//! - `pg`: el store sobre Postgres (commits transaccionales, CAS de tareas).
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgStore, PoolProvider};
