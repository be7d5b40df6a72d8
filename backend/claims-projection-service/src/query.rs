use std::sync::Arc;
use tokio::sync::watch;

use crate::services::cdc::Record;
use crate::store::ProjectionStore;

/// Read access to the projection.
///
/// Cheap to clone; every clone sees the same store. Reads never block on I/O
/// and return shared snapshots of whole rows.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<ProjectionStore>,
    ready: watch::Receiver<bool>,
}

impl QueryService {
    pub fn new(store: Arc<ProjectionStore>, ready: watch::Receiver<bool>) -> Self {
        Self { store, ready }
    }

    /// A query service over `store` that reports itself ready
    pub fn detached(store: Arc<ProjectionStore>) -> Self {
        let (_, ready) = watch::channel(true);
        Self::new(store, ready)
    }

    /// Current row for `id`; absence is a normal outcome
    pub fn get_by_key(&self, id: &str) -> Option<Arc<Record>> {
        self.store.get(id)
    }

    /// Every live row, in unspecified order
    pub fn get_all(&self) -> Vec<Arc<Record>> {
        self.store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether the session has replayed the topic backlog
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}
