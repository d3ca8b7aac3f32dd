use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Policies, PolicyCache};
use crate::{
    naming::{NamespaceName, TopicName},
    system_topic::{
        EventCategory, EventPosition, PolicyEvent, ReaderState, Result, StartPosition,
        SystemTopicFactory, SystemTopicReader,
    },
};

/// Keeps the broker's [`PolicyCache`] fed for every namespace it serves, and publishes policy changes.
#[derive(Debug)]
pub struct PolicyService {
    factory: Arc<SystemTopicFactory>,
    cache: Arc<PolicyCache>,
    readers: Mutex<HashMap<(NamespaceName, EventCategory), SystemTopicReader>>,
}

impl PolicyService {
    pub fn new(factory: Arc<SystemTopicFactory>, cache: Arc<PolicyCache>) -> Self {
        Self {
            factory,
            cache,
            readers: Default::default(),
        }
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    pub fn factory(&self) -> &Arc<SystemTopicFactory> {
        &self.factory
    }

    /// Start following the system topics of `namespace`, creating them if needed.
    pub async fn ensure_namespace(&self, namespace: &NamespaceName) -> Result<()> {
        for category in EventCategory::ALL {
            let key = (namespace.clone(), category);
            if self.readers.lock().contains_key(&key) {
                continue;
            }

            let client = self.factory.client(namespace, category).await?;
            let mut readers = self.readers.lock();
            if !readers.contains_key(&key) {
                let mut reader = client.new_reader(StartPosition::Earliest, Arc::clone(&self.cache));
                reader.start();
                info!(namespace = %namespace, topic = %category, "following system topic");
                readers.insert(key, reader);
            }
        }
        Ok(())
    }

    /// Stop following `namespace` and drop its cached policies.
    pub async fn unload_namespace(&self, namespace: &NamespaceName) {
        let readers: Vec<_> = {
            let mut readers = self.readers.lock();
            EventCategory::ALL
                .iter()
                .filter_map(|category| readers.remove(&(namespace.clone(), *category)))
                .collect()
        };

        for mut reader in readers {
            reader.close().await;
        }
        let removed = self.cache.remove_namespace(namespace);
        debug!(namespace = %namespace, removed, "unloaded namespace policies");
    }

    pub fn is_loaded(&self, namespace: &NamespaceName) -> bool {
        self.readers
            .lock()
            .keys()
            .any(|(ns, _)| ns == namespace)
    }

    /// State of the reader following `category` of `namespace`, if any.
    pub fn reader_state(
        &self,
        namespace: &NamespaceName,
        category: EventCategory,
    ) -> Option<ReaderState> {
        self.readers
            .lock()
            .get(&(namespace.clone(), category))
            .map(SystemTopicReader::state)
    }

    pub async fn update_namespace_policies(
        &self,
        namespace: &NamespaceName,
        policies: Policies,
    ) -> Result<EventPosition> {
        self.publish(PolicyEvent::namespace_policies(namespace.clone(), policies))
            .await
    }

    pub async fn update_topic_policies(
        &self,
        topic: &TopicName,
        policies: Policies,
    ) -> Result<EventPosition> {
        self.publish(PolicyEvent::topic_policies(topic, policies))
            .await
    }

    pub async fn delete_topic_policies(&self, topic: &TopicName) -> Result<EventPosition> {
        self.publish(PolicyEvent::delete_topic_policies(topic)).await
    }

    /// Publish `event` on its system topic. Brokers following the namespace, this one included, pick it
    /// up through their readers.
    pub async fn publish(&self, event: PolicyEvent) -> Result<EventPosition> {
        let client = self
            .factory
            .client(&event.namespace, event.category())
            .await?;
        client.new_writer().publish(&event).await
    }

    /// Stop every reader.
    pub async fn close(&self) {
        let readers: Vec<_> = self.readers.lock().drain().map(|(_, r)| r).collect();
        for mut reader in readers {
            reader.close().await;
        }
    }
}
