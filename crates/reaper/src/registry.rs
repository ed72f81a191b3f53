//! Registry of resources owned by this process.

use api_types::ResourceKind;
use api_types::ResourceRegistration;
use dashmap::DashMap;
use dashmap::DashSet;

/// Concurrent, deduplicated record of what has to be cleaned up.
///
/// Containers map to a label used for logging; networks and images are plain
/// sets. All operations are safe to call from any thread.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    containers: DashMap<String, String>,
    networks: DashSet<String>,
    images: DashSet<String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_container(&self, id: impl Into<String>, label: impl Into<String>) {
        self.containers.insert(id.into(), label.into());
    }

    pub fn insert_network(&self, id: impl Into<String>) {
        self.networks.insert(id.into());
    }

    pub fn insert_image(&self, name: impl Into<String>) {
        self.images.insert(name.into());
    }

    pub fn remove_container(&self, id: &str) -> bool {
        self.containers.remove(id).is_some()
    }

    pub fn remove_network(&self, id: &str) -> bool {
        self.networks.remove(id).is_some()
    }

    pub fn remove_image(&self, name: &str) -> bool {
        self.images.remove(name).is_some()
    }

    pub fn container_label(&self, id: &str) -> Option<String> {
        self.containers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains_container(&self, id: &str) -> bool {
        self.containers.contains_key(id)
    }

    pub fn contains_network(&self, id: &str) -> bool {
        self.networks.contains(id)
    }

    pub fn contains_image(&self, name: &str) -> bool {
        self.images.contains(name)
    }

    pub fn len(&self) -> usize {
        self.containers.len() + self.networks.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out every registration: containers first, then networks, then images.
    ///
    /// Entries registered while the copy is taken may or may not be included.
    pub fn snapshot(&self) -> Vec<ResourceRegistration> {
        let mut snapshot = Vec::with_capacity(self.len());
        snapshot.extend(self.containers.iter().map(|entry| {
            ResourceRegistration::new(
                entry.key().clone(),
                ResourceKind::Container,
                entry.value().clone(),
            )
        }));
        snapshot.extend(
            self.networks
                .iter()
                .map(|id| ResourceRegistration::unlabelled(id.key().clone(), ResourceKind::Network)),
        );
        snapshot.extend(
            self.images
                .iter()
                .map(|name| ResourceRegistration::unlabelled(name.key().clone(), ResourceKind::Image)),
        );
        snapshot
    }

    /// Keeps the network `id` registered until the returned slot is dropped.
    pub(crate) fn network_slot<'a>(&'a self, id: &'a str) -> NetworkSlot<'a> {
        NetworkSlot { registry: self, id }
    }
}

/// Unregisters a network on drop, whatever happened to the removal in between.
pub(crate) struct NetworkSlot<'a> {
    registry: &'a ResourceRegistry,
    id: &'a str,
}

impl Drop for NetworkSlot<'_> {
    fn drop(&mut self) {
        self.registry.remove_network(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn inserts_are_deduplicated() {
        let registry = ResourceRegistry::new();
        registry.insert_container("c1", "redis:7");
        registry.insert_container("c1", "redis:7");
        registry.insert_network("n1");
        registry.insert_network("n1");
        registry.insert_image("app:dev");

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.container_label("c1").as_deref(), Some("redis:7"));
    }

    #[test]
    fn snapshot_orders_by_kind() {
        let registry = ResourceRegistry::new();
        registry.insert_image("app:dev");
        registry.insert_network("n1");
        registry.insert_container("c1", "redis:7");

        let kinds: Vec<_> = registry.snapshot().into_iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::Container, ResourceKind::Network, ResourceKind::Image]
        );
    }

    #[test]
    fn snapshot_labels_fall_back_to_the_id() {
        let registry = ResourceRegistry::new();
        registry.insert_container("c1", "redis:7");
        registry.insert_network("n1");

        let labels: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| (r.id, r.label))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("c1".to_string(), "redis:7".to_string()),
                ("n1".to_string(), "n1".to_string()),
            ]
        );
    }

    #[test]
    fn network_slot_unregisters_on_drop() {
        let registry = ResourceRegistry::new();
        registry.insert_network("n1");
        {
            let _slot = registry.network_slot("n1");
            assert!(registry.contains_network("n1"));
        }
        assert!(!registry.contains_network("n1"));
    }

    #[test]
    fn concurrent_registration_keeps_every_entry() {
        let registry = Arc::new(ResourceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        registry.insert_container(format!("c-{t}-{i}"), "img");
                        registry.insert_network(format!("n-{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 100 * 2);
    }
}
