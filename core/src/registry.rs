//! Tag → live request table for top-level executions.
//!
//! # Design
//! A request is present exactly while it executes at the top level. Bulk
//! cancellation iterates a snapshot taken under the lock and cancels with
//! the lock released, because `cancel` unregisters and would otherwise
//! re-enter the map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::{Request, RequestTag};

#[derive(Default)]
pub struct RequestRegistry {
    requests: Mutex<HashMap<RequestTag, Arc<dyn Request>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `request` under its tag. An existing entry is overwritten.
    pub fn register(&self, request: Arc<dyn Request>) {
        let tag = request.info().tag.clone();
        let previous = self.requests.lock().insert(tag.clone(), request);
        if previous.is_some() {
            tracing::debug!(tag = %tag, "overwrote registered request");
        } else {
            tracing::trace!(tag = %tag, "registered request");
        }
    }

    /// Remove the entry for `tag`. Missing tags are ignored.
    pub fn unregister(&self, tag: &RequestTag) -> Option<Arc<dyn Request>> {
        let removed = self.requests.lock().remove(tag);
        if removed.is_some() {
            tracing::trace!(tag = %tag, "unregistered request");
        }
        removed
    }

    pub fn get(&self, tag: &RequestTag) -> Option<Arc<dyn Request>> {
        self.requests.lock().get(tag).cloned()
    }

    pub fn contains(&self, tag: &RequestTag) -> bool {
        self.requests.lock().contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Request>> {
        self.requests.lock().values().cloned().collect()
    }

    /// Cancel every registered request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let requests = self.snapshot();
        for request in &requests {
            request.cancel();
        }
        requests.len()
    }

    /// Cancel the registered requests whose group is `group`.
    pub fn cancel_group(&self, group: &str) -> usize {
        let requests: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|request| request.info().group.as_deref() == Some(group))
            .collect();
        for request in &requests {
            request.cancel();
        }
        tracing::debug!(group, cancelled = requests.len(), "cancelled request group");
        requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestInfo, RequestKind, RequestState};
    use std::sync::Weak;

    /// Registry-aware stand-in that unregisters itself on cancel, like real
    /// requests do.
    struct Stub {
        info: RequestInfo,
        registry: Weak<RequestRegistry>,
        state: Mutex<RequestState>,
    }

    impl Stub {
        fn new(registry: &Arc<RequestRegistry>, group: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                info: RequestInfo::new(RequestKind::Single, group.map(str::to_string)),
                registry: Arc::downgrade(registry),
                state: Mutex::new(RequestState::Executing),
            })
        }
    }

    impl Request for Stub {
        fn info(&self) -> &RequestInfo {
            &self.info
        }

        fn state(&self) -> RequestState {
            *self.state.lock()
        }

        fn execute(&self) -> bool {
            false
        }

        fn cancel(&self) {
            *self.state.lock() = RequestState::Cancelled;
            if let Some(registry) = self.registry.upgrade() {
                registry.unregister(&self.info.tag);
            }
        }
    }

    #[test]
    fn register_lookup_and_unregister() {
        let registry = Arc::new(RequestRegistry::new());
        let stub = Stub::new(&registry, None);
        registry.register(stub.clone());

        assert!(registry.contains(&stub.info.tag));
        assert_eq!(registry.get(&stub.info.tag).unwrap().info(), &stub.info);

        assert!(registry.unregister(&stub.info.tag).is_some());
        assert!(registry.unregister(&stub.info.tag).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let registry = Arc::new(RequestRegistry::new());
        let stub = Stub::new(&registry, None);
        registry.register(stub.clone());
        registry.register(stub.clone());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_group_leaves_other_groups_registered() {
        let registry = Arc::new(RequestRegistry::new());
        let g1 = Stub::new(&registry, Some("g"));
        let g2 = Stub::new(&registry, Some("g"));
        let other = Stub::new(&registry, Some("h"));
        let ungrouped = Stub::new(&registry, None);
        for stub in [&g1, &g2, &other, &ungrouped] {
            registry.register(stub.clone());
        }

        assert_eq!(registry.cancel_group("g"), 2);

        assert_eq!(g1.state(), RequestState::Cancelled);
        assert_eq!(g2.state(), RequestState::Cancelled);
        assert_eq!(other.state(), RequestState::Executing);
        assert_eq!(ungrouped.state(), RequestState::Executing);
        assert!(registry.contains(&other.info.tag));
        assert!(registry.contains(&ungrouped.info.tag));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn cancel_all_empties_the_registry_while_requests_unregister() {
        let registry = Arc::new(RequestRegistry::new());
        for _ in 0..5 {
            registry.register(Stub::new(&registry, None));
        }
        assert_eq!(registry.cancel_all(), 5);
        assert!(registry.is_empty());
    }
}
