use crate::ids::{LeaseId, RedoRecordId};
use std::sync::atomic::{AtomicU64, Ordering};

/// A writer's redo-record namespace. Counters are handed out in increasing order, so records of
/// one lease are totally ordered.
pub struct Lease {
    id: LeaseId,
    counter: AtomicU64,
}

impl Lease {
    pub fn new(id: LeaseId) -> Self {
        Lease {
            id,
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn generate() -> Self {
        Lease::new(LeaseId::generate())
    }

    pub fn id(&self) -> &LeaseId {
        &self.id
    }

    pub fn next_record_id(&self) -> RedoRecordId {
        RedoRecordId::new(self.id.clone(), self.counter.fetch_add(1, Ordering::SeqCst))
    }
}
