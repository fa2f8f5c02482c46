//! Metadata Cache (C3): a pure lookup over the latest decoded `MetadataSnapshot`, resolved against
//! the worker's live connection pool.

use std::sync::Arc;

use crate::network::BrokerConnection;
use crate::protocol::{BrokerMetadata, KafkaCode, PartitionId, TopicMetadata};

/// A pooled connection to one broker endpoint. Cheaply cloned (it is an `Arc`) so the cache can
/// hand out references without taking `Cluster` out of the worker's hands.
pub type Broker = Arc<BrokerConnection>;

/// `{ brokers, topics }`, atomically replacing the prior view on every successful refresh.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

/// The worker's live broker pool plus its latest metadata snapshot — the two together are what
/// `broker_for` needs to resolve a `(topic, partition)` pair all the way down to a connection.
#[derive(Default)]
pub struct Cluster {
    pub snapshot: MetadataSnapshot,
    pub connections: Vec<Broker>,
}

impl Cluster {
    pub fn connection_for_node(&self, node_id: i32) -> Option<Broker> {
        self.connections
            .iter()
            .find(|broker| broker.node_id == node_id)
            .cloned()
    }

    /// Resolve the partition leader to a live connection. `None` if the topic/partition is
    /// missing, the leader is unelected (`-1`), either error code is non-zero, or the leader's
    /// connection has since been pruned — any of which should trigger an on-demand refresh.
    pub fn broker_for(&self, topic: &str, partition: PartitionId) -> Option<Broker> {
        let topic_metadata = self.snapshot.topics.iter().find(|t| t.topic == topic)?;
        if topic_metadata.error_code != 0 {
            return None;
        }

        let partition_metadata = topic_metadata
            .partitions
            .iter()
            .find(|p| p.partition_id == partition)?;
        if partition_metadata.error_code != 0 || partition_metadata.leader == -1 {
            return None;
        }

        self.connection_for_node(partition_metadata.leader)
    }

    /// `Some(code)` when the partition metadata names a specific server-side error (e.g.
    /// `LeaderNotAvailable`) rather than a plain cache miss — used to distinguish the two symbols
    /// the produce and offset paths must preserve (§9 open questions).
    pub fn partition_error(&self, topic: &str, partition: PartitionId) -> Option<KafkaCode> {
        let topic_metadata = self.snapshot.topics.iter().find(|t| t.topic == topic)?;
        let code = if topic_metadata.error_code != 0 {
            topic_metadata.error_code
        } else {
            topic_metadata
                .partitions
                .iter()
                .find(|p| p.partition_id == partition)?
                .error_code
        };
        KafkaCode::from_code(code)
    }

    pub fn any_connected(&self) -> Option<Broker> {
        self.connections.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PartitionMetadata;

    fn snapshot_with_leader(leader: i32, error_code: i16) -> MetadataSnapshot {
        MetadataSnapshot {
            brokers: vec![BrokerMetadata {
                node_id: 1,
                host: "h".into(),
                port: 9092,
            }],
            topics: vec![TopicMetadata {
                topic: "t".into(),
                error_code: 0,
                partitions: vec![PartitionMetadata {
                    partition_id: 0,
                    error_code,
                    leader,
                    replicas: vec![1],
                    isrs: vec![1],
                }],
            }],
        }
    }

    #[test]
    fn broker_for_misses_when_leader_unelected() {
        let cluster = Cluster {
            snapshot: snapshot_with_leader(-1, 0),
            connections: Vec::new(),
        };
        assert!(cluster.broker_for("t", 0).is_none());
    }

    #[test]
    fn broker_for_misses_on_partition_error() {
        let cluster = Cluster {
            snapshot: snapshot_with_leader(1, 5),
            connections: Vec::new(),
        };
        assert!(cluster.broker_for("t", 0).is_none());
        assert_eq!(cluster.partition_error("t", 0), Some(KafkaCode::LeaderNotAvailable));
    }

    #[test]
    fn broker_for_misses_when_no_matching_connection() {
        let cluster = Cluster {
            snapshot: snapshot_with_leader(1, 0),
            connections: Vec::new(),
        };
        assert!(cluster.broker_for("t", 0).is_none());
    }

    #[test]
    fn broker_for_misses_on_unknown_topic() {
        let cluster = Cluster {
            snapshot: snapshot_with_leader(1, 0),
            connections: Vec::new(),
        };
        assert!(cluster.broker_for("other", 0).is_none());
    }
}
