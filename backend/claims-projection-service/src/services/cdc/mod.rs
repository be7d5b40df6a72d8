mod consumer;
mod materializer;
mod models;
mod readiness;
mod security;
mod session;

pub use consumer::{CdcIngestor, ConsumerErrorState, ConsumerStatus, EnvelopeHandler};
pub use materializer::{ApplyOutcome, Materializer};
pub use models::{
    fields, resolve_store_key, CdcMessage, CdcOperation, CdcPayload, CdcSource, ChangeEnvelope,
    Record,
};
pub use readiness::{CatchUpTracker, PartitionTarget};
pub use security::{ScramCredentials, SecurityConfig, SecurityProtocol, TrustStore};
pub use session::{ProjectionSession, SessionHealth};
