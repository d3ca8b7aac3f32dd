//! Broker configuration.
use std::time::Duration;

use crate::{backoff::BackoffConfig, policies::AutoTopicCreationDefaults};

/// Settings of one broker. Listeners are configured separately on the [`BrokerBuilder`](crate::BrokerBuilder).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Upper bound for every metadata store operation issued on behalf of a lookup.
    pub lookup_timeout: Duration,

    /// Whether this broker takes ownership of unowned bundles.
    pub allow_bundle_ownership: bool,

    /// Bundles of a namespace that was never registered explicitly.
    pub default_bundles: u32,

    pub auto_topic_creation: AutoTopicCreationDefaults,

    pub system_topic: SystemTopicConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(30),
            allow_bundle_ownership: true,
            default_bundles: 4,
            auto_topic_creation: AutoTopicCreationDefaults::default(),
            system_topic: SystemTopicConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_allow_bundle_ownership(mut self, allow: bool) -> Self {
        self.allow_bundle_ownership = allow;
        self
    }

    pub fn with_default_bundles(mut self, bundles: u32) -> Self {
        self.default_bundles = bundles.max(1);
        self
    }

    pub fn with_auto_topic_creation(mut self, defaults: AutoTopicCreationDefaults) -> Self {
        self.auto_topic_creation = defaults;
        self
    }

    pub fn with_system_topic(mut self, config: SystemTopicConfig) -> Self {
        self.system_topic = config;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SystemTopicConfig {
    /// Partitions of newly created system topics. Can be changed at runtime through
    /// [`SystemTopicFactory::set_default_num_partitions`](crate::system_topic::SystemTopicFactory::set_default_num_partitions).
    pub default_num_partitions: u32,

    /// A publish not acknowledged within this window fails.
    pub publish_timeout: Duration,

    /// Maximum events fetched per read.
    pub read_batch_size: usize,

    /// Delay between reconnection attempts of a reader.
    pub reader_backoff: BackoffConfig,
}

impl Default for SystemTopicConfig {
    fn default() -> Self {
        Self {
            default_num_partitions: 1,
            publish_timeout: Duration::from_secs(30),
            read_batch_size: 100,
            reader_backoff: BackoffConfig::default(),
        }
    }
}

impl SystemTopicConfig {
    pub fn with_default_num_partitions(mut self, partitions: u32) -> Self {
        self.default_num_partitions = partitions.max(1);
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size.max(1);
        self
    }

    pub fn with_reader_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reader_backoff = backoff;
        self
    }
}
