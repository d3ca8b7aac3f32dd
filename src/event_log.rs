//! Partitioned, append-only event log backing system topics.
//!
//! The log is an external collaborator. Within a partition it orders appends and assigns strictly
//! increasing offsets; nothing is ordered across partitions.
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::naming::TopicName;

pub use self::memory::MemoryEventLog;

mod memory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Topic \"{0}\" does not exist")]
    TopicNotFound(String),

    #[error("Connection to the event log lost: {0}")]
    Disconnected(String),

    #[error("Invalid request for \"{topic}\": {reason}")]
    InvalidRequest { topic: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One event of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: u64,
    pub payload: Bytes,
}

#[async_trait]
pub trait EventLog: Debug + Send + Sync {
    /// Create `topic` with `partitions` partitions.
    ///
    /// Creating a topic that already exists leaves it untouched and returns its existing partition count.
    async fn create_partitioned_topic(&self, topic: &TopicName, partitions: u32) -> Result<u32>;

    /// Partition count of `topic`, `None` if it does not exist.
    async fn partitions(&self, topic: &TopicName) -> Result<Option<u32>>;

    /// Append `payload` to `partition` (a partition name, see [`TopicName::partition`]) and return its
    /// offset.
    async fn append(&self, partition: &TopicName, payload: Bytes) -> Result<u64>;

    /// Offset of the oldest retained event, or of the next event if the partition is empty.
    async fn earliest_offset(&self, partition: &TopicName) -> Result<u64>;

    /// Up to `max` events at or after `from`.
    ///
    /// Waits until at least one event is available. Reading from before the earliest retained offset
    /// starts at the earliest retained offset.
    async fn read(&self, partition: &TopicName, from: u64, max: usize) -> Result<Vec<LogEntry>>;
}
