use std::{collections::BTreeMap, sync::Arc};

use futures::future::try_join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{Error, EventPosition, PolicyEvent, Result, SystemTopicDescriptor};
use crate::{
    backoff::{Backoff, BackoffConfig},
    config::SystemTopicConfig,
    event_log::{self, EventLog, LogEntry},
    policies::{Applied, PolicyCache},
};

/// Where a reader starts consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// The oldest retained event of every partition.
    Earliest,

    /// Next offset to read per partition. Partitions not listed start at the earliest event.
    Checkpoint(BTreeMap<u32, u64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    Connecting,
    Tailing,
    Closed,
}

/// Tails every partition of one system topic and folds the events into a [`PolicyCache`].
///
/// After a lost connection the reader reconnects with backoff and resumes after the last event it applied.
/// Events are applied one at a time, each together with its checkpoint, so a resumed reader never skips an
/// event; it may deliver one twice, which the cache ignores.
#[derive(Debug)]
pub struct SystemTopicReader {
    task: Option<ReaderTask>,
    cursors: Arc<Mutex<BTreeMap<u32, u64>>>,
    state: watch::Receiver<ReaderState>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    descriptor: SystemTopicDescriptor,
}

impl SystemTopicReader {
    pub(super) fn new(
        descriptor: SystemTopicDescriptor,
        log: Arc<dyn EventLog>,
        cache: Arc<PolicyCache>,
        start: StartPosition,
        config: &SystemTopicConfig,
    ) -> Self {
        let cursors = match start {
            StartPosition::Earliest => BTreeMap::new(),
            StartPosition::Checkpoint(cursors) => cursors,
        };
        let cursors = Arc::new(Mutex::new(cursors));
        let (state_tx, state) = watch::channel(ReaderState::NotStarted);
        let (shutdown, _) = watch::channel(false);

        let task = ReaderTask {
            descriptor: descriptor.clone(),
            log,
            cache,
            batch_size: config.read_batch_size.max(1),
            backoff: config.reader_backoff.clone(),
            cursors: Arc::clone(&cursors),
            state: state_tx,
        };

        Self {
            task: Some(task),
            cursors,
            state,
            shutdown,
            handle: None,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &SystemTopicDescriptor {
        &self.descriptor
    }

    /// Spawn the background task. Calling this more than once has no effect.
    pub fn start(&mut self) {
        if let Some(task) = self.task.take() {
            let shutdown = self.shutdown.subscribe();
            self.handle = Some(tokio::spawn(task.run(shutdown)));
        }
    }

    pub fn state(&self) -> ReaderState {
        *self.state.borrow()
    }

    /// Wait until the reader reaches `state`. Returns immediately once the reader is closed.
    pub async fn wait_for_state(&self, state: ReaderState) -> ReaderState {
        let mut rx = self.state.clone();
        match rx
            .wait_for(|s| *s == state || *s == ReaderState::Closed)
            .await
        {
            Ok(s) => *s,
            Err(_) => ReaderState::Closed,
        }
    }

    /// Next offset to read per partition, suitable for [`StartPosition::Checkpoint`].
    pub fn checkpoint(&self) -> BTreeMap<u32, u64> {
        self.cursors.lock().clone()
    }

    /// Stop the background task and wait for it to finish.
    pub async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.state.send_replace(ReaderState::Closed);
        }
        self.shutdown.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(topic = %self.descriptor.topic_name(), e = %e, "system topic reader task failed");
            }
        }
    }
}

impl Drop for SystemTopicReader {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct ReaderTask {
    descriptor: SystemTopicDescriptor,
    log: Arc<dyn EventLog>,
    cache: Arc<PolicyCache>,
    batch_size: usize,
    backoff: BackoffConfig,
    cursors: Arc<Mutex<BTreeMap<u32, u64>>>,
    state: watch::Sender<ReaderState>,
}

impl ReaderTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.descriptor.topic_name();
        let mut backoff = Backoff::new(&self.backoff);

        loop {
            self.state.send_replace(ReaderState::Connecting);
            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.connect_and_tail(&mut backoff) => result,
            };

            let delay = backoff.next();
            match result {
                Ok(()) => debug!(topic = %topic, "system topic reader stopped tailing"),
                Err(e) => warn!(
                    topic = %topic,
                    e = %e,
                    delay_secs = delay.as_secs_f64(),
                    "system topic reader lost its connection, reconnecting"
                ),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ReaderState::Closed);
        info!(topic = %topic, "system topic reader closed");
    }

    /// Position every partition and tail them until one fails.
    async fn connect_and_tail(&self, backoff: &mut Backoff<StdRng>) -> Result<()> {
        let topic = self.descriptor.topic_name();
        let partitions = self
            .log
            .partitions(&topic)
            .await?
            .ok_or_else(|| Error::Log(event_log::Error::TopicNotFound(topic.to_string())))?;
        if partitions != self.descriptor.partitions {
            warn!(
                topic = %topic,
                expected = self.descriptor.partitions,
                actual = partitions,
                "system topic partition count differs from its descriptor"
            );
        }
        let partitions = partitions.min(self.descriptor.partitions);

        for partition in 0..partitions {
            let earliest = self
                .log
                .earliest_offset(&self.descriptor.partition_name(partition))
                .await?;

            let mut cursors = self.cursors.lock();
            let next = cursors.entry(partition).or_insert(earliest);
            if *next < earliest {
                warn!(
                    topic = %topic,
                    partition,
                    checkpoint = *next,
                    earliest,
                    "events since the checkpoint are no longer retained"
                );
                *next = earliest;
            }
        }

        backoff.reset();
        self.state.send_replace(ReaderState::Tailing);
        info!(topic = %topic, partitions, "tailing system topic");

        try_join_all((0..partitions).map(|partition| self.tail(partition))).await?;
        Ok(())
    }

    async fn tail(&self, partition: u32) -> Result<()> {
        let name = self.descriptor.partition_name(partition);
        loop {
            let from = self.cursors.lock().get(&partition).copied().unwrap_or_default();
            let entries = self.log.read(&name, from, self.batch_size).await?;
            for entry in entries {
                self.apply(partition, entry);
            }
        }
    }

    /// Fold one event and advance the partition's cursor past it.
    fn apply(&self, partition: u32, entry: LogEntry) {
        let position = EventPosition {
            partition,
            sequence_id: entry.offset,
        };

        match PolicyEvent::decode(&entry.payload) {
            Ok(event) => match self.cache.apply(&event, position) {
                Applied::Updated => debug!(key = %event.key(), ?position, "applied policy event"),
                Applied::Duplicate => debug!(key = %event.key(), ?position, "ignored duplicate policy event"),
            },
            Err(e) => error!(
                topic = %self.descriptor.topic_name(),
                ?position,
                e = %e,
                "skipping undecodable policy event"
            ),
        }

        self.cursors.lock().insert(partition, entry.offset + 1);
    }
}
