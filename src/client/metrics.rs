//! The optional event sink (`WorkerState.event_sink`), generalized from the teacher's
//! `prometheus`-backed `Metrics` registry (`Inner::metrics`, `KafkaClient::metrics()`). Never
//! load-bearing: every call site treats a missing sink as a no-op.

use std::fmt;

use prometheus::{IntCounterVec, Opts, Registry};

/// Observability hook the worker calls out to on the events it already logs. A sink
/// implementation is free to export these as Prometheus counters, StatsD, or nothing at all.
pub trait EventSink: Send + Sync {
    fn request_sent(&self, api_key: i16) {
        let _ = api_key;
    }

    fn response_received(&self, api_key: i16) {
        let _ = api_key;
    }

    fn request_timed_out(&self, api_key: i16) {
        let _ = api_key;
    }

    fn metadata_refreshed(&self, broker_count: usize, topic_count: usize) {
        let _ = (broker_count, topic_count);
    }
}

/// A sink that only logs, useful when `prometheus` registration is not wanted (e.g. in tests).
#[derive(Debug, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn request_sent(&self, api_key: i16) {
        trace!("sent request, api_key={}", api_key);
    }

    fn response_received(&self, api_key: i16) {
        trace!("received response, api_key={}", api_key);
    }

    fn request_timed_out(&self, api_key: i16) {
        warn!("request timed out, api_key={}", api_key);
    }

    fn metadata_refreshed(&self, broker_count: usize, topic_count: usize) {
        debug!(
            "metadata refreshed: {} brokers, {} topics",
            broker_count, topic_count
        );
    }
}

impl fmt::Debug for dyn EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// The teacher's `Metrics` registry, generalized to the events this worker emits: one counter
/// vector per event kind, labeled by `api_key`.
pub struct PrometheusSink {
    requests_sent: IntCounterVec,
    responses_received: IntCounterVec,
    timeouts: IntCounterVec,
    metadata_refreshes: prometheus::IntCounter,
}

impl PrometheusSink {
    pub fn new(registry: &Registry) -> prometheus::Result<PrometheusSink> {
        let requests_sent = IntCounterVec::new(
            Opts::new("kafka_worker_requests_sent_total", "Requests sent per api key"),
            &["api_key"],
        )?;
        let responses_received = IntCounterVec::new(
            Opts::new(
                "kafka_worker_responses_received_total",
                "Responses received per api key",
            ),
            &["api_key"],
        )?;
        let timeouts = IntCounterVec::new(
            Opts::new("kafka_worker_request_timeouts_total", "Request timeouts per api key"),
            &["api_key"],
        )?;
        let metadata_refreshes = prometheus::IntCounter::new(
            "kafka_worker_metadata_refreshes_total",
            "Metadata refreshes completed",
        )?;

        registry.register(Box::new(requests_sent.clone()))?;
        registry.register(Box::new(responses_received.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(metadata_refreshes.clone()))?;

        Ok(PrometheusSink {
            requests_sent,
            responses_received,
            timeouts,
            metadata_refreshes,
        })
    }
}

impl EventSink for PrometheusSink {
    fn request_sent(&self, api_key: i16) {
        self.requests_sent
            .with_label_values(&[&api_key.to_string()])
            .inc();
    }

    fn response_received(&self, api_key: i16) {
        self.responses_received
            .with_label_values(&[&api_key.to_string()])
            .inc();
    }

    fn request_timed_out(&self, api_key: i16) {
        self.timeouts.with_label_values(&[&api_key.to_string()]).inc();
    }

    fn metadata_refreshed(&self, broker_count: usize, topic_count: usize) {
        let _ = (broker_count, topic_count);
        self.metadata_refreshes.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_sink_is_a_harmless_default() {
        let sink = LoggingSink;
        sink.request_sent(3);
        sink.response_received(3);
        sink.request_timed_out(3);
        sink.metadata_refreshed(1, 1);
    }

    #[test]
    fn prometheus_sink_registers_and_counts() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry).unwrap();

        sink.request_sent(3);
        sink.response_received(3);
        sink.metadata_refreshed(2, 5);

        let families = registry.gather();
        assert!(!families.is_empty());
    }
}
