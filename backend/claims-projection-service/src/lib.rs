//! Claims projection service
//!
//! Keeps an in-memory, continuously updated projection of the system-of-record
//! `quotes` table by replaying its Debezium CDC topic, and serves point and
//! full-table reads against it.
//!
//! ```text
//! Kafka topic -> CdcIngestor -> Materializer -> ProjectionStore -> QueryService -> HTTP
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod query;
pub mod services;
pub mod store;

pub use error::{ProjectionError, Result};
pub use query::QueryService;
pub use services::cdc::{ProjectionSession, Record};
pub use store::ProjectionStore;
