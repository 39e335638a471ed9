use std::sync::{Arc, Weak};

use dashmap::DashMap;

use cameradar_core::ids::ConnectionId;

use crate::connection::ConnectionHandle;

/// Live connections by id.
///
/// Entries are weak: the registry never keeps a connection alive, and a
/// lookup only holds the handle for the length of one delivery.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Weak<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: &Arc<ConnectionHandle>) {
        let _ = self
            .connections
            .insert(handle.id().clone(), Arc::downgrade(handle));
    }

    /// The handle for `id`, if it is still alive and open.
    pub fn resolve(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let weak = self.connections.get(id).map(|entry| entry.value().clone())?;
        weak.upgrade().filter(|handle| handle.is_open())
    }

    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
