//! Write-through cache for device assignments.
//!
//! Callers put the stored record into the cache right after each successful
//! write, so a cached entry always equals the store of record.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use fleetwire_core::model::DeviceAssignment;

/// LRU cache of assignments keyed by token.
pub struct AssignmentCache {
    entries: Mutex<LruCache<String, DeviceAssignment>>,
}

impl AssignmentCache {
    /// Create a cache holding up to `capacity` assignments.
    ///
    /// Returns `None` for a zero capacity, meaning caching is disabled.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn get(&self, token: &str) -> Option<DeviceAssignment> {
        self.entries.lock().get(token).cloned()
    }

    /// Store the record just written to the store.
    pub fn put(&self, assignment: &DeviceAssignment) {
        self.entries
            .lock()
            .put(assignment.token.clone(), assignment.clone());
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.lock().pop(token);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::model::{DeviceAssignmentCreateRequest, DeviceCreateRequest};
    use fleetwire_core::persistence;

    fn assignment(token: &str) -> DeviceAssignment {
        let device =
            persistence::device_create_logic(&DeviceCreateRequest::new("dev-1", "spec", "site"))
                .unwrap();
        let mut request = DeviceAssignmentCreateRequest::unassociated("dev-1");
        request.token = Some(token.to_string());
        persistence::assignment_create_logic(&request, &device).unwrap()
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        assert!(AssignmentCache::new(0).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = AssignmentCache::new(2).unwrap();
        cache.put(&assignment("a"));
        cache.put(&assignment("b"));
        assert!(cache.get("a").is_some());
        cache.put(&assignment("c"));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
    }
}
