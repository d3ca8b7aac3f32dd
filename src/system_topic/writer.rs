use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use super::{Error, EventPosition, PolicyEvent, Result, SystemTopicDescriptor};
use crate::event_log::EventLog;

/// Publishes policy events to one system topic.
///
/// Events for the same namespace or topic are routed to the same partition, so their relative order is
/// preserved for readers. A publish that is not acknowledged within the publish timeout fails and is not
/// retried here.
#[derive(Debug)]
pub struct SystemTopicWriter {
    descriptor: SystemTopicDescriptor,
    log: Arc<dyn EventLog>,
    publish_timeout: Duration,
}

impl SystemTopicWriter {
    pub(super) fn new(
        descriptor: SystemTopicDescriptor,
        log: Arc<dyn EventLog>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            log,
            publish_timeout,
        }
    }

    pub fn descriptor(&self) -> &SystemTopicDescriptor {
        &self.descriptor
    }

    /// Publish `event`, returning the position it was stored at.
    pub async fn publish(&self, event: &PolicyEvent) -> Result<EventPosition> {
        let key = event.key();
        if event.category() != self.descriptor.category || key.namespace() != &self.descriptor.namespace {
            return Err(Error::WrongTopic {
                key: key.to_string(),
                topic: self.descriptor.topic_name().to_string(),
            });
        }

        let partition = self.descriptor.partition_for(&key.to_string());
        let partition_name = self.descriptor.partition_name(partition);
        let payload = event.encode()?;

        let sequence_id =
            match tokio::time::timeout(self.publish_timeout, self.log.append(&partition_name, payload))
                .await
            {
                Ok(Ok(offset)) => offset,
                Ok(Err(e)) => {
                    warn!(topic = %partition_name, key = %key, e = %e, "policy event publish failed");
                    return Err(Error::PolicyPublishFailed(e.to_string()));
                }
                Err(_) => {
                    warn!(topic = %partition_name, key = %key, "policy event publish timed out");
                    return Err(Error::PolicyPublishFailed(format!(
                        "not acknowledged within {:?}",
                        self.publish_timeout
                    )));
                }
            };

        debug!(topic = %partition_name, key = %key, sequence_id, "published policy event");
        Ok(EventPosition {
            partition,
            sequence_id,
        })
    }
}
