//! Metadata Refresher (C4): periodic + on-demand reconciliation of the cluster view against a
//! live Metadata request, with bounded retry on `LeaderNotAvailable`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::client::cluster::{Broker, Cluster, MetadataSnapshot};
use crate::client::config::RETRY_BACKOFF;
use crate::client::metrics::EventSink;
use crate::errors::{Error, ErrorKind, Result};
use crate::network::{BrokerConnection, SslOptions};
use crate::protocol::{decode_metadata_response, CorrelationId, KafkaCode, MetadataRequest};

/// The result of one `retrieve_metadata` call: the decoded snapshot plus the correlation id to
/// resume from (Invariant 2 — monotone, +1 per issued request, including retries).
pub struct Retrieved {
    pub snapshot: MetadataSnapshot,
    pub next_correlation_id: CorrelationId,
}

/// §4.4 algorithm. `topics` empty means "all topics". Sends to the first connected broker in
/// `connections`, in order; `ErrNoBrokersAvailable` if none answer at all.
pub async fn retrieve_metadata(
    connections: &[Broker],
    mut correlation_id: CorrelationId,
    client_id: &str,
    sync_timeout: Duration,
    topics: &[&str],
    mut retries_left: u32,
) -> Result<Retrieved> {
    loop {
        let broker = first_available(connections)
            .ok_or_else(|| Error::from(ErrorKind::NoBrokersAvailable))?;

        let request = MetadataRequest {
            correlation_id,
            client_id,
            topics: topics.to_vec(),
        };

        let mut response_buf = broker.send_sync(request.encode(), sync_timeout).await?;
        let header_correlation_id = crate::protocol::decode_response_header(&mut response_buf)?.correlation_id;
        let response = decode_metadata_response(header_correlation_id, response_buf)?;

        let snapshot = MetadataSnapshot {
            brokers: response.brokers,
            topics: response.topics,
        };

        correlation_id = correlation_id.wrapping_add(1);

        let leader_not_available = snapshot
            .topics
            .iter()
            .any(|t| KafkaCode::from_code(t.error_code) == Some(KafkaCode::LeaderNotAvailable));

        if !leader_not_available || retries_left == 0 {
            if leader_not_available {
                warn!("metadata refresh exhausted retries with LeaderNotAvailable, returning best-effort snapshot");
            }
            return Ok(Retrieved {
                snapshot,
                next_correlation_id: correlation_id,
            });
        }

        retries_left -= 1;
        tokio::time::sleep(backoff_with_jitter()).await;
    }
}

fn first_available(connections: &[Broker]) -> Option<Broker> {
    connections.first().cloned()
}

/// A few tens of milliseconds of jitter on top of `RETRY_BACKOFF`, so that many workers retrying
/// against the same flaky broker don't all wake up in lockstep — the same spirit as the teacher's
/// `rand::thread_rng().shuffle(&mut brokers)` broker-selection jitter, applied to the retry clock
/// instead of the broker order.
fn backoff_with_jitter() -> Duration {
    RETRY_BACKOFF + Duration::from_millis(rand::thread_rng().gen_range(0..50))
}

/// Broker-list reconciliation (§4.4), run by the worker after a successful refresh.
///
/// Preserves the source's exact (and slightly surprising) partitioning predicate: a bootstrap
/// broker (`node_id == -1`) is always kept, bypassing the liveness check entirely — see the §9
/// open question this crate deliberately preserves.
pub async fn reconcile(
    cluster: &mut Cluster,
    use_ssl: bool,
    ssl_options: &SslOptions,
) -> Result<()> {
    let new_broker_ids: Vec<i32> = cluster.snapshot.brokers.iter().map(|b| b.node_id).collect();

    let mut keep = Vec::new();
    let mut remove = Vec::new();

    for conn in cluster.connections.drain(..) {
        let is_bootstrap = conn.node_id == -1;
        let still_present = new_broker_ids.contains(&conn.node_id);
        let live = conn.connected().await && conn.info().await;

        if is_bootstrap || (still_present && live) {
            keep.push(conn);
        } else {
            remove.push(conn);
        }
    }

    // Safety clamp (Invariant 4): never leave the worker with zero endpoints.
    let (surviving, discarded) = if keep.is_empty() && !remove.is_empty() {
        (remove, Vec::new())
    } else {
        (keep, remove)
    };

    for conn in &discarded {
        conn.close().await;
    }

    let mut connections = surviving;

    for broker_meta in &cluster.snapshot.brokers {
        if connections.iter().any(|c| c.node_id == broker_meta.node_id) {
            continue;
        }

        match BrokerConnection::connect(
            broker_meta.node_id,
            &broker_meta.host,
            broker_meta.port,
            use_ssl,
            ssl_options,
        )
        .await
        {
            Ok(conn) => connections.push(Arc::new(conn)),
            Err(err) => warn!(
                "failed to connect to broker {} ({}:{}): {}",
                broker_meta.node_id, broker_meta.host, broker_meta.port, err
            ),
        }
    }

    cluster.connections = connections;
    Ok(())
}

pub fn report_refresh(sink: &dyn EventSink, snapshot: &MetadataSnapshot) {
    sink.metadata_refreshed(snapshot.brokers.len(), snapshot.topics.len());
}
