//! Client-facing surface: configuration, the metadata cache, the ambient event sink, the
//! metadata refresher, and the broker-worker actor itself.

pub mod cluster;
pub mod config;
pub mod metrics;
pub mod refresher;
pub mod worker;

pub use self::cluster::{Cluster, MetadataSnapshot};
pub use self::config::ClientConfig;
pub use self::metrics::{EventSink, LoggingSink, PrometheusSink};
pub use self::worker::BrokerWorkerHandle;
