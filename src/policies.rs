//! Namespace and topic policies.
//!
//! Policies are never read from the metadata store on the lookup path. They travel as events on the
//! namespace's system topics and are folded into a per-broker [`PolicyCache`] by the system topic readers.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming::{NamespaceName, TopicName};

pub use self::cache::{Applied, PolicyCache};
pub use self::service::PolicyService;

mod cache;
mod service;

/// Settings attached to a namespace or a topic. Unset fields fall back to the next level up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_topic_creation: Option<AutoTopicCreationOverride>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_producers_per_topic: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consumers_per_topic: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ttl_seconds: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionPolicies>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplication_enabled: Option<bool>,
}

impl Policies {
    /// Fields set in `self` take precedence over `base`.
    pub fn merged_over(&self, base: &Self) -> Self {
        Self {
            auto_topic_creation: self
                .auto_topic_creation
                .clone()
                .or_else(|| base.auto_topic_creation.clone()),
            max_producers_per_topic: self
                .max_producers_per_topic
                .or(base.max_producers_per_topic),
            max_consumers_per_topic: self
                .max_consumers_per_topic
                .or(base.max_consumers_per_topic),
            message_ttl_seconds: self.message_ttl_seconds.or(base.message_ttl_seconds),
            retention: self.retention.or(base.retention),
            deduplication_enabled: self.deduplication_enabled.or(base.deduplication_enabled),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicies {
    /// `-1` retains forever.
    pub retention_time_in_minutes: i64,

    /// `-1` retains regardless of size.
    pub retention_size_in_mb: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicType {
    #[default]
    NonPartitioned,
    Partitioned,
}

/// Namespace override of the broker's auto topic creation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTopicCreationOverride {
    pub allow_auto_topic_creation: bool,

    #[serde(default)]
    pub topic_type: TopicType,

    /// Only meaningful for [`TopicType::Partitioned`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_num_partitions: Option<u32>,
}

/// Broker-wide auto topic creation settings, used when a namespace has no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoTopicCreationDefaults {
    pub allow_auto_topic_creation: bool,
    pub topic_type: TopicType,
    pub default_num_partitions: u32,
}

impl Default for AutoTopicCreationDefaults {
    fn default() -> Self {
        Self {
            allow_auto_topic_creation: true,
            topic_type: TopicType::NonPartitioned,
            default_num_partitions: 1,
        }
    }
}

/// What a broker does with a topic that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTopicCreation {
    Disabled,
    NonPartitioned,
    Partitioned { partitions: u32 },
}

impl AutoTopicCreation {
    /// Apply `policy` on top of `defaults`.
    pub fn resolve(
        defaults: &AutoTopicCreationDefaults,
        policy: Option<&AutoTopicCreationOverride>,
    ) -> Self {
        let (allow, topic_type, partitions) = match policy {
            Some(o) => (
                o.allow_auto_topic_creation,
                o.topic_type,
                o.default_num_partitions
                    .unwrap_or(defaults.default_num_partitions),
            ),
            None => (
                defaults.allow_auto_topic_creation,
                defaults.topic_type,
                defaults.default_num_partitions,
            ),
        };

        match (allow, topic_type) {
            (false, _) => Self::Disabled,
            (true, TopicType::NonPartitioned) => Self::NonPartitioned,
            (true, TopicType::Partitioned) => Self::Partitioned {
                partitions: partitions.max(1),
            },
        }
    }
}

/// What a policy event applies to. Topic policies are keyed by the logical (partitioned) topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKey {
    Namespace(NamespaceName),
    Topic(TopicName),
}

impl PolicyKey {
    pub fn topic(topic: &TopicName) -> Self {
        Self::Topic(topic.partitioned_topic_name())
    }

    pub fn namespace(&self) -> &NamespaceName {
        match self {
            Self::Namespace(ns) => ns,
            Self::Topic(topic) => topic.namespace(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(ns) => write!(f, "{ns}"),
            Self::Topic(topic) => write!(f, "{topic}"),
        }
    }
}
