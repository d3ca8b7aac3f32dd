use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EventCategory, Result, SystemTopicClient, SystemTopicDescriptor};
use crate::{
    config::SystemTopicConfig,
    event_log::EventLog,
    naming::NamespaceName,
    store::{self, ExpectedVersion, MetadataStore},
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorRecord {
    partitions: u32,
}

/// Creates system topics on first use and hands out clients for them.
///
/// The partition count of a system topic is decided once, by whichever broker registers its descriptor
/// first; every other broker adopts the stored count.
#[derive(Debug)]
pub struct SystemTopicFactory {
    store: Arc<dyn MetadataStore>,
    log: Arc<dyn EventLog>,
    config: SystemTopicConfig,
    default_num_partitions: AtomicU32,
    operation_timeout: Duration,
    descriptors: RwLock<HashMap<(NamespaceName, EventCategory), SystemTopicDescriptor>>,
}

impl SystemTopicFactory {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        log: Arc<dyn EventLog>,
        config: SystemTopicConfig,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            log,
            default_num_partitions: AtomicU32::new(config.default_num_partitions.max(1)),
            config,
            operation_timeout,
            descriptors: Default::default(),
        }
    }

    pub fn default_num_partitions(&self) -> u32 {
        self.default_num_partitions.load(Ordering::SeqCst)
    }

    /// Only system topics created from now on use the new count.
    pub fn set_default_num_partitions(&self, partitions: u32) {
        let partitions = partitions.max(1);
        info!(partitions, "changed default system topic partitions");
        self.default_num_partitions.store(partitions, Ordering::SeqCst);
    }

    /// Get or create the `category` system topic of `namespace`.
    pub async fn get_or_create(
        &self,
        namespace: &NamespaceName,
        category: EventCategory,
    ) -> Result<SystemTopicDescriptor> {
        let key = (namespace.clone(), category);
        if let Some(descriptor) = self.descriptors.read().get(&key) {
            return Ok(descriptor.clone());
        }

        let path = descriptor_path(namespace, category);
        let record = match self.timed(self.store.get(&path)).await? {
            Some(value) => store::decode::<DescriptorRecord>(&path, &value.value)?,
            None => self.register(&path).await?,
        };

        let descriptor = SystemTopicDescriptor {
            namespace: namespace.clone(),
            category,
            partitions: record.partitions,
        };

        let topic = descriptor.topic_name();
        let actual = self
            .log
            .create_partitioned_topic(&topic, descriptor.partitions)
            .await?;
        if actual != descriptor.partitions {
            warn!(
                topic = %topic,
                expected = descriptor.partitions,
                actual,
                "system topic exists with a different partition count"
            );
        }

        self.descriptors.write().insert(key, descriptor.clone());
        Ok(descriptor)
    }

    /// A client for the `category` system topic of `namespace`, creating the topic if needed.
    pub async fn client(
        &self,
        namespace: &NamespaceName,
        category: EventCategory,
    ) -> Result<SystemTopicClient> {
        let descriptor = self.get_or_create(namespace, category).await?;
        Ok(SystemTopicClient::new(
            descriptor,
            Arc::clone(&self.log),
            self.config.clone(),
        ))
    }

    /// Store a descriptor with the current default, or adopt the one a concurrent creator stored first.
    async fn register(&self, path: &str) -> Result<DescriptorRecord> {
        let record = DescriptorRecord {
            partitions: self.default_num_partitions(),
        };
        let value = store::encode(path, &record)?;

        match self
            .timed(self.store.put(path, value, ExpectedVersion::Absent, None))
            .await
        {
            Ok(_) => {
                info!(path, partitions = record.partitions, "registered system topic");
                Ok(record)
            }
            Err(store::Error::BadVersion { .. }) => {
                debug!(path, "system topic registered concurrently");
                match self.timed(self.store.get(path)).await? {
                    Some(value) => Ok(store::decode(path, &value.value)?),
                    None => Err(store::Error::BadVersion {
                        path: path.to_owned(),
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = store::Result<T>> + Send,
    ) -> store::Result<T> {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(store::Error::Unavailable(format!(
                    "no response within {:?}",
                    self.operation_timeout
                )))
            })
    }
}

/// `/system-topics/<tenant>/<namespace>/<local name>`
fn descriptor_path(namespace: &NamespaceName, category: EventCategory) -> String {
    format!("/system-topics/{namespace}/{}", category.local_name())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{event_log::MemoryEventLog, store::MemoryMetadataStore, system_topic::Error};

    fn factory(
        store: &Arc<MemoryMetadataStore>,
        log: &Arc<MemoryEventLog>,
        partitions: u32,
    ) -> SystemTopicFactory {
        SystemTopicFactory::new(
            Arc::clone(store) as Arc<dyn MetadataStore>,
            Arc::clone(log) as Arc<dyn EventLog>,
            SystemTopicConfig::default().with_default_num_partitions(partitions),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_partition_count_is_fixed_at_creation() {
        let store = Arc::new(MemoryMetadataStore::new());
        let log = Arc::new(MemoryEventLog::new());
        let ns: NamespaceName = "prop/ns".parse().unwrap();

        let f = factory(&store, &log, 5);
        let created = f
            .get_or_create(&ns, EventCategory::TopicPolicies)
            .await
            .unwrap();
        assert_eq!(created.partitions, 5);
        assert_eq!(
            log.partitions(&created.topic_name()).await.unwrap(),
            Some(5)
        );

        f.set_default_num_partitions(0);
        assert_eq!(f.default_num_partitions(), 1);

        // the existing topic keeps its count, on this broker and on a fresh one
        let again = f
            .get_or_create(&ns, EventCategory::TopicPolicies)
            .await
            .unwrap();
        assert_eq!(again.partitions, 5);
        let other = factory(&store, &log, 2)
            .get_or_create(&ns, EventCategory::TopicPolicies)
            .await
            .unwrap();
        assert_eq!(other.partitions, 5);

        // new topics use the new default
        let ns_events = f
            .get_or_create(&ns, EventCategory::NamespacePolicies)
            .await
            .unwrap();
        assert_eq!(ns_events.partitions, 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_agrees() {
        let store = Arc::new(MemoryMetadataStore::new());
        let log = Arc::new(MemoryEventLog::new());
        let ns: NamespaceName = "prop/ns".parse().unwrap();

        let a = factory(&store, &log, 3);
        let b = factory(&store, &log, 7);
        let (da, db) = tokio::join!(
            a.get_or_create(&ns, EventCategory::TopicPolicies),
            b.get_or_create(&ns, EventCategory::TopicPolicies),
        );
        let (da, db) = (da.unwrap(), db.unwrap());
        assert_eq!(da, db);
        assert_eq!(
            log.partitions(&da.topic_name()).await.unwrap(),
            Some(da.partitions)
        );
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let store = Arc::new(MemoryMetadataStore::new());
        let log = Arc::new(MemoryEventLog::new());
        store.set_available(false);

        let result = factory(&store, &log, 1)
            .get_or_create(&"prop/ns".parse().unwrap(), EventCategory::TopicPolicies)
            .await;
        assert_matches!(result, Err(Error::Store(store::Error::Unavailable(_))));
    }
}
