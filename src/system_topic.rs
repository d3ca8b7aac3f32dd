//! Per-namespace system topics carrying policy events.
//!
//! Each namespace has one system topic per [`EventCategory`]. Its partition count is fixed when the topic
//! is first created and recorded in a [`SystemTopicDescriptor`]; later changes to the configured default
//! only affect topics created afterwards.
use std::{fmt, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::SystemTopicConfig,
    event_log::{self, EventLog},
    naming::{NamespaceName, TopicDomain, TopicName},
    policies::{Policies, PolicyCache, PolicyKey},
    store,
};

pub use self::factory::SystemTopicFactory;
pub use self::reader::{ReaderState, StartPosition, SystemTopicReader};
pub use self::writer::SystemTopicWriter;

mod factory;
mod reader;
mod writer;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Metadata store error: {0}")]
    Store(#[from] store::Error),

    #[error("Event log error: {0}")]
    Log(#[from] event_log::Error),

    #[error("Failed to publish policy event: {0}")]
    PolicyPublishFailed(String),

    #[error("Event for {key} does not belong on system topic {topic}")]
    WrongTopic { key: String, topic: String },

    #[error("Cannot decode policy event: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of policy events a system topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    /// Topic-level policies.
    TopicPolicies,

    /// Namespace-level policies.
    NamespacePolicies,
}

impl EventCategory {
    pub const ALL: [Self; 2] = [Self::TopicPolicies, Self::NamespacePolicies];

    /// Local name of the category's topic within each namespace.
    pub fn local_name(&self) -> &'static str {
        match self {
            Self::TopicPolicies => "__change_events",
            Self::NamespacePolicies => "__namespace_events",
        }
    }

    /// The category's topic in `namespace`.
    pub fn topic_name(&self, namespace: &NamespaceName) -> TopicName {
        TopicName::from_parts_unchecked(TopicDomain::Persistent, namespace.clone(), self.local_name())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name())
    }
}

/// A system topic as it was created: the partition count never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTopicDescriptor {
    pub namespace: NamespaceName,
    pub category: EventCategory,
    pub partitions: u32,
}

impl SystemTopicDescriptor {
    pub fn topic_name(&self) -> TopicName {
        self.category.topic_name(&self.namespace)
    }

    pub fn partition_name(&self, partition: u32) -> TopicName {
        self.topic_name().partition(partition)
    }

    /// Events with the same routing key always land on the same partition.
    pub fn partition_for(&self, routing_key: &str) -> u32 {
        crc32c::crc32c(routing_key.as_bytes()) % self.partitions.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A policy change as published on a system topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvent {
    pub namespace: NamespaceName,

    /// Set for topic policies, always the logical (partitioned) topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicName>,

    pub event_type: EventType,

    /// Absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Policies>,

    pub published_at: DateTime<Utc>,
}

impl PolicyEvent {
    pub fn namespace_policies(namespace: NamespaceName, policies: Policies) -> Self {
        Self {
            namespace,
            topic: None,
            event_type: EventType::Update,
            policies: Some(policies),
            published_at: Utc::now(),
        }
    }

    pub fn topic_policies(topic: &TopicName, policies: Policies) -> Self {
        Self {
            namespace: topic.namespace().clone(),
            topic: Some(topic.partitioned_topic_name()),
            event_type: EventType::Update,
            policies: Some(policies),
            published_at: Utc::now(),
        }
    }

    pub fn delete_topic_policies(topic: &TopicName) -> Self {
        Self {
            namespace: topic.namespace().clone(),
            topic: Some(topic.partitioned_topic_name()),
            event_type: EventType::Delete,
            policies: None,
            published_at: Utc::now(),
        }
    }

    pub fn key(&self) -> PolicyKey {
        match &self.topic {
            Some(topic) => PolicyKey::topic(topic),
            None => PolicyKey::Namespace(self.namespace.clone()),
        }
    }

    /// The system topic this event belongs on.
    pub fn category(&self) -> EventCategory {
        match self.topic {
            Some(_) => EventCategory::TopicPolicies,
            None => EventCategory::NamespacePolicies,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Where a delivered event sits in its system topic. The sequence id is the event's offset within the
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventPosition {
    pub partition: u32,
    pub sequence_id: u64,
}

/// Handle on one system topic, creating readers and writers for it.
#[derive(Debug, Clone)]
pub struct SystemTopicClient {
    descriptor: SystemTopicDescriptor,
    log: Arc<dyn EventLog>,
    config: SystemTopicConfig,
}

impl SystemTopicClient {
    pub(crate) fn new(
        descriptor: SystemTopicDescriptor,
        log: Arc<dyn EventLog>,
        config: SystemTopicConfig,
    ) -> Self {
        Self {
            descriptor,
            log,
            config,
        }
    }

    pub fn descriptor(&self) -> &SystemTopicDescriptor {
        &self.descriptor
    }

    pub fn new_writer(&self) -> SystemTopicWriter {
        SystemTopicWriter::new(
            self.descriptor.clone(),
            Arc::clone(&self.log),
            self.config.publish_timeout,
        )
    }

    /// A reader folding this topic into `cache`. It does nothing until [started](SystemTopicReader::start).
    pub fn new_reader(&self, start: StartPosition, cache: Arc<PolicyCache>) -> SystemTopicReader {
        SystemTopicReader::new(
            self.descriptor.clone(),
            Arc::clone(&self.log),
            cache,
            start,
            &self.config,
        )
    }
}
