use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{Error, EventLog, LogEntry, Result};
use crate::naming::TopicName;

/// In-process [`EventLog`].
///
/// Can simulate a lost connection ([`disconnect`](Self::disconnect)), slow appends and retention.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    topics: RwLock<HashMap<TopicName, Vec<Arc<Partition>>>>,
    disconnected: AtomicBool,
    append_delay: Mutex<Option<Duration>>,
}

#[derive(Debug, Default)]
struct Partition {
    state: Mutex<PartitionState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct PartitionState {
    /// Offset of `entries[0]`.
    first_offset: u64,
    entries: VecDeque<Bytes>,
}

impl PartitionState {
    fn next_offset(&self) -> u64 {
        self.first_offset + self.entries.len() as u64
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation, including reads already waiting, until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        info!("event log disconnected");
        self.disconnected.store(true, Ordering::SeqCst);
        for partition in self.topics.read().values().flatten() {
            partition.notify.notify_waiters();
        }
    }

    pub fn reconnect(&self) {
        info!("event log reconnected");
        self.disconnected.store(false, Ordering::SeqCst);
    }

    /// Delay every append by `delay`.
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        *self.append_delay.lock() = delay;
    }

    /// Drop the events of `partition` below offset `before`.
    pub fn trim(&self, partition: &TopicName, before: u64) -> Result<()> {
        let partition_log = self.partition(partition)?;
        let mut state = partition_log.state.lock();
        while state.first_offset < before && !state.entries.is_empty() {
            state.entries.pop_front();
            state.first_offset += 1;
        }
        debug!(partition = %partition, earliest = state.first_offset, "trimmed partition");
        Ok(())
    }

    /// Number of events currently retained in `partition`.
    pub fn retained(&self, partition: &TopicName) -> Result<usize> {
        Ok(self.partition(partition)?.state.lock().entries.len())
    }

    fn check_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(Error::Disconnected("event log is offline".to_owned()))
        } else {
            Ok(())
        }
    }

    fn partition(&self, partition: &TopicName) -> Result<Arc<Partition>> {
        let Some(index) = partition.partition_index() else {
            return Err(Error::InvalidRequest {
                topic: partition.to_string(),
                reason: "not a partition name".to_owned(),
            });
        };

        let topics = self.topics.read();
        topics
            .get(&partition.partitioned_topic_name())
            .and_then(|partitions| partitions.get(index as usize))
            .map(Arc::clone)
            .ok_or_else(|| Error::TopicNotFound(partition.to_string()))
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn create_partitioned_topic(&self, topic: &TopicName, partitions: u32) -> Result<u32> {
        self.check_connected()?;
        if topic.is_partition() || partitions == 0 {
            return Err(Error::InvalidRequest {
                topic: topic.to_string(),
                reason: format!("cannot create {partitions} partitions"),
            });
        }

        let mut topics = self.topics.write();
        let existing = topics.entry(topic.clone()).or_insert_with(|| {
            info!(topic = %topic, partitions, "created partitioned topic");
            (0..partitions).map(|_| Arc::default()).collect()
        });
        Ok(existing.len() as u32)
    }

    async fn partitions(&self, topic: &TopicName) -> Result<Option<u32>> {
        self.check_connected()?;
        Ok(self
            .topics
            .read()
            .get(&topic.partitioned_topic_name())
            .map(|p| p.len() as u32))
    }

    async fn append(&self, partition: &TopicName, payload: Bytes) -> Result<u64> {
        let delay = *self.append_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_connected()?;

        let partition_log = self.partition(partition)?;
        let offset = {
            let mut state = partition_log.state.lock();
            let offset = state.next_offset();
            state.entries.push_back(payload);
            offset
        };
        partition_log.notify.notify_waiters();
        Ok(offset)
    }

    async fn earliest_offset(&self, partition: &TopicName) -> Result<u64> {
        self.check_connected()?;
        Ok(self.partition(partition)?.state.lock().first_offset)
    }

    async fn read(&self, partition: &TopicName, from: u64, max: usize) -> Result<Vec<LogEntry>> {
        let partition_log = self.partition(partition)?;
        loop {
            // register before checking so an append in between is not missed
            let notified = partition_log.notify.notified();
            self.check_connected()?;

            {
                let state = partition_log.state.lock();
                let start = from.max(state.first_offset);
                if start < state.next_offset() {
                    let skip = (start - state.first_offset) as usize;
                    return Ok(state
                        .entries
                        .iter()
                        .skip(skip)
                        .take(max.max(1))
                        .zip(start..)
                        .map(|(payload, offset)| LogEntry {
                            offset,
                            payload: payload.clone(),
                        })
                        .collect());
                }
            }

            notified.await;
        }
    }
}
