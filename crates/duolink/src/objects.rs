//! # Live Objects
//!
//! The process-wide table of instances the other runtime holds references to.
//!
//! References are minted from a counter and never reused, so a reference that
//! is below the counter but missing from the table was certainly closed.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::ObjectRef;

use crate::registry::RemoteObject;

pub struct LiveObjects {
    table: DashMap<ObjectRef, Arc<dyn RemoteObject>>,
    next: AtomicU64,
}

impl Default for LiveObjects {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveObjects {
    pub fn new() -> Self {
        Self { table: DashMap::new(), next: AtomicU64::new(1) }
    }

    /// Stores an instance under a fresh reference.
    pub fn insert(&self, object: Arc<dyn RemoteObject>) -> ObjectRef {
        let r = ObjectRef(self.next.fetch_add(1, Ordering::Relaxed));
        self.table.insert(r, object);
        r
    }

    /// Returns a strong reference, so a racing `remove` cannot free the
    /// instance while a method call is still using it.
    pub fn get(&self, r: ObjectRef) -> Result<Arc<dyn RemoteObject>, Failure> {
        match self.table.get(&r) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(self.missing(r)),
        }
    }

    /// Removes an instance. Unknown and already-closed references are both stale.
    pub fn remove(&self, r: ObjectRef) -> Result<Arc<dyn RemoteObject>, Failure> {
        self.table
            .remove(&r)
            .map(|(_, object)| object)
            .ok_or_else(|| Failure::new(FailureKind::Stale, format!("{} is not live", r)))
    }

    pub fn contains(&self, r: ObjectRef) -> bool {
        self.table.contains_key(&r)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn missing(&self, r: ObjectRef) -> Failure {
        if r.0 != 0 && r.0 < self.next.load(Ordering::Relaxed) {
            Failure::new(FailureKind::Stale, format!("{} was closed", r))
        } else {
            Failure::new(FailureKind::NotFound, format!("no object {}", r))
        }
    }
}

impl std::fmt::Debug for LiveObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveObjects").field("len", &self.len()).finish()
    }
}
