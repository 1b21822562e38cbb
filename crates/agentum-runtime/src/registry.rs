use crate::hub::EventHub;
use crate::supervisor::CancelHandle;
use agentum_types::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Process-wide view of live runs: `session_id -> hub` and
/// `session_id -> cancel handle`.
///
/// Entries are created and removed only by the task runner / supervisor;
/// HTTP handlers read them for streaming and cancel forwarding. Both maps
/// sit behind plain mutexes since every critical section is a map touch.
#[derive(Default)]
pub struct Registry {
    hubs: Mutex<HashMap<String, Arc<EventHub>>>,
    supervisors: Mutex<HashMap<String, CancelHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &SessionId, hub: Arc<EventHub>, cancel: CancelHandle) {
        self.hubs
            .lock()
            .expect("hub map poisoned")
            .insert(id.as_str().to_string(), hub);
        self.supervisors
            .lock()
            .expect("supervisor map poisoned")
            .insert(id.as_str().to_string(), cancel);
    }

    pub fn remove(&self, id: &SessionId) {
        self.hubs.lock().expect("hub map poisoned").remove(id.as_str());
        self.supervisors
            .lock()
            .expect("supervisor map poisoned")
            .remove(id.as_str());
    }

    pub fn hub(&self, id: &SessionId) -> Option<Arc<EventHub>> {
        self.hubs
            .lock()
            .expect("hub map poisoned")
            .get(id.as_str())
            .cloned()
    }

    pub fn cancel_handle(&self, id: &SessionId) -> Option<CancelHandle> {
        self.supervisors
            .lock()
            .expect("supervisor map poisoned")
            .get(id.as_str())
            .cloned()
    }

    /// Number of sessions with a live supervisor; the capacity bound
    /// checks against this.
    pub fn running_count(&self) -> usize {
        self.supervisors
            .lock()
            .expect("supervisor map poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let registry = Registry::new();
        let id = SessionId::parse("20260105_123456_deadbeef").unwrap();
        let (hub, _persist) = EventHub::new(id.clone(), 8, 0);
        let cancel = CancelHandle::new();

        assert!(registry.hub(&id).is_none());
        registry.insert(&id, hub, cancel);
        assert!(registry.hub(&id).is_some());
        assert!(registry.cancel_handle(&id).is_some());
        assert_eq!(registry.running_count(), 1);

        registry.remove(&id);
        assert!(registry.hub(&id).is_none());
        assert_eq!(registry.running_count(), 0);
    }
}
