use std::sync::Arc;
use tracing::debug;

use super::models::{resolve_store_key, CdcMessage, ChangeEnvelope};
use crate::error::{ProjectionError, Result};
use crate::store::ProjectionStore;

/// Effect of applying one envelope to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Upserted { key: String },
    Removed { key: String, existed: bool },
}

/// Applies change envelopes to the projection.
///
/// This is the only writer of the [`ProjectionStore`]: last writer wins per key,
/// an envelope without a post-change row removes the key.
pub struct Materializer {
    store: Arc<ProjectionStore>,
}

impl Materializer {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ProjectionStore> {
        &self.store
    }

    /// Apply a single envelope.
    ///
    /// A `Decode` error leaves the store untouched; the caller logs and moves on.
    pub fn apply(&self, envelope: &ChangeEnvelope) -> Result<ApplyOutcome> {
        let (after, before) = match &envelope.value {
            None => (None, None),
            Some(value) => {
                let msg = CdcMessage::decode(value)?;
                let before = msg.before();
                (msg.into_after()?, before)
            }
        };

        // A keyless delete is located through its pre-change row
        let row = after.as_ref().or(before.as_ref());
        let key = resolve_store_key(envelope.key.as_deref(), row).ok_or_else(|| {
            ProjectionError::Decode("envelope has no key and no 'quoteid' in its row".to_string())
        })?;

        match after {
            Some(record) => {
                debug!(
                    key = %key,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    "Upserting projected row"
                );
                self.store.upsert(key.clone(), record);
                Ok(ApplyOutcome::Upserted { key })
            }
            None => {
                let existed = self.store.remove(&key);
                debug!(
                    key = %key,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    existed,
                    "Removed projected row"
                );
                Ok(ApplyOutcome::Removed { key, existed })
            }
        }
    }
}
