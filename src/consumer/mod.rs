//! Consumer-Group Ops (C6): join/sync/heartbeat/leave and coordinator-scoped offset commit/fetch,
//! layered on top of the broker-worker. Partition assignment strategy, subscription bookkeeping,
//! and the streaming fetch loop are the teacher's `consumer::{assignor,subscriptions,fetcher,
//! consumer,builder}` — out of scope here (Non-goals: this crate stops at group membership and
//! offset storage, not the high-level `Consumer` record stream).

pub mod coordinator;

use std::time::Duration;

use crate::client::worker::BrokerWorkerHandle;
use crate::errors::Result;
use crate::protocol::JoinGroupResponse;

/// One member's view of a joined group: its own id, the chosen protocol, and (for the leader) the
/// full member list to assign partitions over.
#[derive(Debug, Clone)]
pub struct Generation {
    pub generation_id: i32,
    pub member_id: String,
    pub protocol: String,
    pub leader_id: String,
    pub members: Vec<(String, Vec<u8>)>,
}

impl Generation {
    pub fn is_leader(&self) -> bool {
        self.member_id == self.leader_id
    }
}

impl From<JoinGroupResponse> for Generation {
    fn from(response: JoinGroupResponse) -> Self {
        Generation {
            generation_id: response.generation_id,
            member_id: response.member_id,
            protocol: response.protocol,
            leader_id: response.leader_id,
            members: response
                .members
                .into_iter()
                .map(|m| (m.member_id, m.metadata.to_vec()))
                .collect(),
        }
    }
}

/// A joined consumer group session. Holds the worker handle and the group/member identity needed
/// to keep calling heartbeat/offset ops without the caller re-threading them through every call.
pub struct ConsumerGroupHandle {
    worker: BrokerWorkerHandle,
    group_id: String,
    generation: Generation,
}

impl ConsumerGroupHandle {
    /// Join `group_id`, sending an empty `member_id` on the first attempt (the coordinator assigns
    /// one and the caller rejoins with it, matching the wire protocol's documented join dance).
    pub async fn join(
        worker: BrokerWorkerHandle,
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        session_timeout: Duration,
        protocol_type: impl Into<String>,
        protocols: Vec<(String, Vec<u8>)>,
    ) -> Result<ConsumerGroupHandle> {
        let group_id = group_id.into();
        let response = worker
            .join_group(
                group_id.clone(),
                member_id,
                session_timeout.as_millis() as i32,
                protocol_type,
                protocols,
                None,
            )
            .await?;

        Ok(ConsumerGroupHandle {
            worker,
            group_id,
            generation: response.into(),
        })
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Sync with the coordinator. The leader passes the per-member assignments it computed from
    /// `generation().members`; followers pass an empty vector and receive their own assignment.
    /// `network_timeout`, when given, overrides the worker's configured `sync_timeout` for this
    /// call only (§4.6).
    pub async fn sync(&self, assignments: Vec<(String, Vec<u8>)>, network_timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.worker
            .sync_group(
                self.group_id.clone(),
                self.generation.generation_id,
                self.generation.member_id.clone(),
                assignments,
                network_timeout,
            )
            .await
    }

    pub async fn heartbeat(&self, network_timeout: Option<Duration>) -> Result<()> {
        self.worker
            .heartbeat(
                self.group_id.clone(),
                self.generation.generation_id,
                self.generation.member_id.clone(),
                network_timeout,
            )
            .await
    }

    pub async fn leave(&self, network_timeout: Option<Duration>) -> Result<()> {
        self.worker
            .leave_group(self.group_id.clone(), self.generation.member_id.clone(), network_timeout)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn commit_offset(
        &self,
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        retention: Duration,
        network_timeout: Option<Duration>,
    ) -> Result<()> {
        self.worker
            .commit_offset(
                self.group_id.clone(),
                self.generation.generation_id,
                self.generation.member_id.clone(),
                retention.as_millis() as i64,
                topic,
                partition,
                offset,
                network_timeout,
            )
            .await
    }

    pub async fn fetch_committed_offset(
        &self,
        topic: impl Into<String>,
        partition: i32,
        network_timeout: Option<Duration>,
    ) -> Result<i64> {
        self.worker
            .fetch_committed_offset(self.group_id.clone(), topic, partition, network_timeout)
            .await
    }
}
