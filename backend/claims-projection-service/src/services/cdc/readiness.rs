use std::collections::HashMap;

/// Offsets of one partition at the moment the session was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTarget {
    pub partition: i32,
    /// Low watermark (first retained offset)
    pub low: i64,
    /// High watermark (offset of the next message to be written)
    pub high: i64,
}

impl PartitionTarget {
    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }
}

/// Tracks replay of the backlog that existed when the session started.
///
/// The projection is ready once every partition has delivered the message just
/// below its starting high watermark, or reported end-of-partition.
#[derive(Debug, Clone, Default)]
pub struct CatchUpTracker {
    pending: HashMap<i32, i64>,
}

impl CatchUpTracker {
    pub fn new(targets: impl IntoIterator<Item = PartitionTarget>) -> Self {
        let pending = targets
            .into_iter()
            .filter(|target| !target.is_empty())
            .map(|target| (target.partition, target.high))
            .collect();
        Self { pending }
    }

    pub fn is_caught_up(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_partitions(&self) -> Vec<i32> {
        let mut partitions: Vec<i32> = self.pending.keys().copied().collect();
        partitions.sort_unstable();
        partitions
    }

    /// Record that `offset` was consumed from `partition`.
    ///
    /// Returns `true` only on the call that completes the catch-up.
    pub fn observe(&mut self, partition: i32, offset: i64) -> bool {
        match self.pending.get(&partition) {
            Some(&high) if offset + 1 >= high => self.complete(partition),
            _ => false,
        }
    }

    /// Record that the consumer reached the end of `partition`
    pub fn end_of_partition(&mut self, partition: i32) -> bool {
        self.complete(partition)
    }

    fn complete(&mut self, partition: i32) -> bool {
        self.pending.remove(&partition).is_some() && self.pending.is_empty()
    }
}
