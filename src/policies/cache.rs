use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::{AutoTopicCreation, AutoTopicCreationDefaults, Policies, PolicyKey};
use crate::{
    naming::{NamespaceName, TopicName},
    system_topic::{EventPosition, EventType, PolicyEvent},
};

/// Outcome of [`PolicyCache::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,

    /// The event was already applied, or an event published after it was.
    Duplicate,
}

#[derive(Debug)]
struct Entry {
    /// `None` once deleted; kept so that a replayed older event cannot resurrect it.
    policies: Option<Policies>,
    position: EventPosition,
}

/// Materialized view of the policy events a broker has consumed.
///
/// Folding is idempotent: all events for one key travel on one partition, so an event at or below the
/// last applied sequence id of its key is a redelivery and is ignored.
#[derive(Debug, Default)]
pub struct PolicyCache {
    entries: RwLock<HashMap<PolicyKey, Entry>>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &PolicyEvent, position: EventPosition) -> Applied {
        let key = event.key();
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(&key) {
            if existing.position.partition == position.partition
                && existing.position.sequence_id >= position.sequence_id
            {
                return Applied::Duplicate;
            }
        }

        let policies = match event.event_type {
            EventType::Insert | EventType::Update => Some(event.policies.clone().unwrap_or_default()),
            EventType::Delete => None,
        };
        debug!(key = %key, ?position, deleted = policies.is_none(), "policy cache updated");
        entries.insert(key, Entry { policies, position });
        Applied::Updated
    }

    pub fn namespace_policies(&self, namespace: &NamespaceName) -> Option<Policies> {
        self.get(&PolicyKey::Namespace(namespace.clone()))
    }

    /// Policies set on `topic` itself. Partitions share the policies of their logical topic.
    pub fn topic_policies(&self, topic: &TopicName) -> Option<Policies> {
        self.get(&PolicyKey::topic(topic))
    }

    /// Topic policies layered over the policies of its namespace.
    pub fn effective_policies(&self, topic: &TopicName) -> Policies {
        let namespace = self.namespace_policies(topic.namespace()).unwrap_or_default();
        match self.topic_policies(topic) {
            Some(policies) => policies.merged_over(&namespace),
            None => namespace,
        }
    }

    pub fn auto_topic_creation(
        &self,
        namespace: &NamespaceName,
        defaults: &AutoTopicCreationDefaults,
    ) -> AutoTopicCreation {
        let policies = self.namespace_policies(namespace);
        AutoTopicCreation::resolve(
            defaults,
            policies.as_ref().and_then(|p| p.auto_topic_creation.as_ref()),
        )
    }

    /// Forget everything known about `namespace`, returning how many keys were dropped.
    pub fn remove_namespace(&self, namespace: &NamespaceName) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.namespace() != namespace);
        before - entries.len()
    }

    fn get(&self, key: &PolicyKey) -> Option<Policies> {
        self.entries
            .read()
            .get(key)
            .and_then(|entry| entry.policies.clone())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::policies::{AutoTopicCreationOverride, TopicType};

    fn at(partition: u32, sequence_id: u64) -> EventPosition {
        EventPosition {
            partition,
            sequence_id,
        }
    }

    fn topic() -> TopicName {
        "persistent://prop/ns/t".parse().unwrap()
    }

    fn ttl(seconds: u32) -> Policies {
        Policies {
            message_ttl_seconds: Some(seconds),
            ..Default::default()
        }
    }

    #[test]
    fn test_redelivery_is_ignored() {
        let cache = PolicyCache::new();
        let t = topic();

        assert_eq!(
            cache.apply(&PolicyEvent::topic_policies(&t, ttl(1)), at(0, 4)),
            Applied::Updated
        );
        assert_eq!(
            cache.apply(&PolicyEvent::topic_policies(&t, ttl(2)), at(0, 5)),
            Applied::Updated
        );

        // replaying the first event does not roll back
        assert_eq!(
            cache.apply(&PolicyEvent::topic_policies(&t, ttl(1)), at(0, 4)),
            Applied::Duplicate
        );
        assert_eq!(cache.topic_policies(&t), Some(ttl(2)));
        assert_eq!(cache.topic_policies(&t.partition(3)), Some(ttl(2)));
    }

    #[test]
    fn test_delete_is_sticky() {
        let cache = PolicyCache::new();
        let t = topic();

        cache.apply(&PolicyEvent::topic_policies(&t, ttl(1)), at(1, 0));
        cache.apply(&PolicyEvent::delete_topic_policies(&t), at(1, 1));
        assert_eq!(cache.topic_policies(&t), None);

        assert_eq!(
            cache.apply(&PolicyEvent::topic_policies(&t, ttl(1)), at(1, 0)),
            Applied::Duplicate
        );
        assert_eq!(cache.topic_policies(&t), None);
    }

    #[test]
    fn test_effective_policies() {
        let cache = PolicyCache::new();
        let t = topic();
        let ns = t.namespace().clone();

        assert_eq!(cache.effective_policies(&t), Policies::default());

        cache.apply(
            &PolicyEvent::namespace_policies(
                ns.clone(),
                Policies {
                    max_producers_per_topic: Some(3),
                    message_ttl_seconds: Some(60),
                    ..Default::default()
                },
            ),
            at(0, 0),
        );
        cache.apply(&PolicyEvent::topic_policies(&t, ttl(5)), at(0, 0));

        let effective = cache.effective_policies(&t);
        assert_eq!(effective.max_producers_per_topic, Some(3));
        assert_eq!(effective.message_ttl_seconds, Some(5));

        assert_eq!(cache.remove_namespace(&ns), 2);
        assert_eq!(cache.effective_policies(&t), Policies::default());
    }

    #[test]
    fn test_auto_topic_creation() {
        let cache = PolicyCache::new();
        let ns: NamespaceName = "prop/ns".parse().unwrap();
        let defaults = AutoTopicCreationDefaults::default();
        assert_eq!(
            cache.auto_topic_creation(&ns, &defaults),
            AutoTopicCreation::NonPartitioned
        );

        cache.apply(
            &PolicyEvent::namespace_policies(
                ns.clone(),
                Policies {
                    auto_topic_creation: Some(AutoTopicCreationOverride {
                        allow_auto_topic_creation: false,
                        topic_type: TopicType::NonPartitioned,
                        default_num_partitions: None,
                    }),
                    ..Default::default()
                },
            ),
            at(0, 0),
        );
        assert_eq!(
            cache.auto_topic_creation(&ns, &defaults),
            AutoTopicCreation::Disabled
        );
    }

    proptest! {
        /// Whatever redeliveries happen, the cache ends up with the last published value.
        #[test]
        fn proptest_fold_with_redelivery(
            values in prop::collection::vec(0u32..100, 1..20),
            replays in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
        ) {
            let cache = PolicyCache::new();
            let t = topic();
            let events: Vec<_> = values
                .iter()
                .map(|v| PolicyEvent::topic_policies(&t, ttl(*v)))
                .collect();

            for (offset, event) in events.iter().enumerate() {
                cache.apply(event, at(0, offset as u64));
                for replay in &replays {
                    let i = replay.index(offset + 1);
                    cache.apply(&events[i], at(0, i as u64));
                }
            }

            prop_assert_eq!(cache.topic_policies(&t), Some(ttl(*values.last().unwrap())));
        }
    }
}
