//! Namespace bundles: hashed sub-ranges of a namespace that are the unit of ownership.
//!
//! Topics are placed on a 32-bit ring by hashing `<namespace>/<local-name>` with CRC32C. A namespace
//! splits the ring into contiguous ranges; the bundle owning a topic is the range its hash falls into.
//! Every range is half-open except the last one, which also contains `0xffffffff`.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{NamespaceName, TopicName};

pub const FULL_LOWER_BOUNDARY: u32 = 0x0000_0000;
pub const FULL_UPPER_BOUNDARY: u32 = 0xffff_ffff;

/// Boundaries of the bundles of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlesData {
    pub boundaries: Vec<u32>,
}

impl BundlesData {
    /// Split the full ring into `num_bundles` equally sized ranges.
    pub fn even(num_bundles: u32) -> Self {
        let num_bundles = u64::from(num_bundles.max(1));
        let step = (u64::from(FULL_UPPER_BOUNDARY) + 1) / num_bundles;

        let mut boundaries: Vec<u32> = (0..num_bundles)
            .map(|i| (i * step) as u32)
            .collect();
        boundaries.push(FULL_UPPER_BOUNDARY);

        Self { boundaries }
    }

    pub fn num_bundles(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    /// Boundaries must cover the full ring in strictly increasing order.
    pub fn is_valid(&self) -> bool {
        self.boundaries.len() >= 2
            && self.boundaries.first() == Some(&FULL_LOWER_BOUNDARY)
            && self.boundaries.last() == Some(&FULL_UPPER_BOUNDARY)
            && self.boundaries.windows(2).all(|w| w[0] < w[1])
    }
}

/// One hashed key range of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceBundle {
    namespace: NamespaceName,
    lower: u32,
    upper: u32,
}

impl NamespaceBundle {
    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    /// `0x00000000_0x80000000`
    pub fn range(&self) -> String {
        format!("0x{:08x}_0x{:08x}", self.lower, self.upper)
    }

    pub fn includes(&self, hash: u32) -> bool {
        (self.lower..self.upper).contains(&hash)
            || (self.upper == FULL_UPPER_BOUNDARY && hash == FULL_UPPER_BOUNDARY)
    }
}

impl fmt::Display for NamespaceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.range())
    }
}

/// All bundles of one namespace, ordered by range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceBundles {
    namespace: NamespaceName,
    bundles: Vec<NamespaceBundle>,
}

impl NamespaceBundles {
    /// Invalid boundaries fall back to a single bundle spanning the ring.
    pub fn new(namespace: NamespaceName, data: &BundlesData) -> Self {
        let boundaries = if data.is_valid() {
            data.boundaries.clone()
        } else {
            BundlesData::even(1).boundaries
        };

        let bundles = boundaries
            .windows(2)
            .map(|w| NamespaceBundle {
                namespace: namespace.clone(),
                lower: w[0],
                upper: w[1],
            })
            .collect();

        Self { namespace, bundles }
    }

    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn bundles(&self) -> &[NamespaceBundle] {
        &self.bundles
    }

    /// The bundle owning `topic`.
    pub fn find_bundle(&self, topic: &TopicName) -> &NamespaceBundle {
        let hash = topic_hash(topic);
        // `bundles` is never empty and its ranges cover the full ring
        let idx = self
            .bundles
            .partition_point(|b| b.upper <= hash)
            .min(self.bundles.len() - 1);
        &self.bundles[idx]
    }
}

/// Position of a topic on the ring; identical for every partition of a logical topic.
pub fn topic_hash(topic: &TopicName) -> u32 {
    crc32c::crc32c(format!("{}/{}", topic.namespace(), topic.local_name()).as_bytes())
}
