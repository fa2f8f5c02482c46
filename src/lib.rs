#![recursion_limit = "128"]
#![allow(dead_code)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
extern crate bytes;
extern crate crc32fast;
extern crate rand;
extern crate serde;
extern crate prometheus;

extern crate futures;
extern crate native_tls;
extern crate tokio;
extern crate tokio_native_tls;

#[cfg(test)]
extern crate pretty_env_logger;

#[macro_use]
pub mod errors;
mod protocol;
mod network;
mod client;
mod consumer;

pub use crate::errors::{Error, ErrorKind};
pub use crate::protocol::{ApiKeys, FetchOffset, KafkaCode, Message, MessageSet, PartitionId, RequiredAcks};
pub use crate::network::{BrokerConnection, SslOptions};
pub use crate::client::{BrokerWorkerHandle, ClientConfig, Cluster, EventSink, LoggingSink, MetadataSnapshot, PrometheusSink};
pub use crate::consumer::{ConsumerGroupHandle, Generation};
