//! Coordinator discovery cache: which broker `node_id` answers group-scoped requests for a given
//! `group_id`, until a `NotCoordinatorForConsumer`/`ConsumerCoordinatorNotAvailable` response says
//! otherwise (§4.6 of the spec; teacher equivalent is `ConsumerCoordinator::state`'s `BrokerRef`).

use std::collections::HashMap;

use crate::client::cluster::{Broker, Cluster};

#[derive(Default)]
pub struct CoordinatorCache {
    by_group: HashMap<String, i32>,
}

impl CoordinatorCache {
    pub fn get(&self, group_id: &str, cluster: &Cluster) -> Option<Broker> {
        let node_id = *self.by_group.get(group_id)?;
        cluster.connection_for_node(node_id)
    }

    pub fn insert(&mut self, group_id: String, node_id: i32) {
        self.by_group.insert(group_id, node_id);
    }

    pub fn remove(&mut self, group_id: &str) {
        self.by_group.remove(group_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_forces_rediscovery() {
        let mut cache = CoordinatorCache::default();
        cache.insert("g".to_owned(), 2);
        assert_eq!(cache.by_group.get("g"), Some(&2));
        cache.remove("g");
        assert!(cache.by_group.get("g").is_none());
    }
}
