//! Fully qualified topic and namespace names.
//!
//! A topic is addressed as `<domain>://<tenant>/<namespace>/<local-name>`, where the domain is either
//! `persistent` or `non-persistent`. Two short forms are accepted as well:
//!
//! - `<tenant>/<namespace>/<local-name>` implies the `persistent` domain
//! - `<local-name>` implies `persistent://public/default/<local-name>`
//!
//! A single partition of a partitioned topic carries a `-partition-<index>` suffix on its local name. The
//! suffix is parsed into [`TopicName::partition_index`] so that all partitions of one logical topic share
//! the same [`TopicName::local_name`].
//!
//! Everything in here is pure; deriving the owning bundle from a name is done by [`bundle`].
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bundle;

/// Tenant used by the single-segment short form.
pub const PUBLIC_TENANT: &str = "public";

/// Namespace used by the single-segment short form.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Separator between the logical local name and the partition index.
pub const PARTITIONED_TOPIC_SUFFIX: &str = "-partition-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid topic name \"{name}\": {reason}")]
    InvalidTopicName { name: String, reason: String },

    #[error("Invalid namespace name \"{name}\": {reason}")]
    InvalidNamespaceName { name: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Storage domain of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicDomain {
    Persistent,
    NonPersistent,
}

impl TopicDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "persistent",
            Self::NonPersistent => "non-persistent",
        }
    }
}

impl fmt::Display for TopicDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persistent" => Ok(Self::Persistent),
            "non-persistent" => Ok(Self::NonPersistent),
            other => Err(format!("unrecognized domain \"{other}\"")),
        }
    }
}

/// `<tenant>/<namespace>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceName {
    tenant: String,
    namespace: String,
}

impl NamespaceName {
    pub fn new(tenant: impl Into<String>, namespace: impl Into<String>) -> Result<Self> {
        let tenant = tenant.into();
        let namespace = namespace.into();
        let invalid = |reason: String| Error::InvalidNamespaceName {
            name: format!("{tenant}/{namespace}"),
            reason,
        };

        check_named_entity("tenant", &tenant).map_err(invalid)?;
        check_named_entity("namespace", &namespace).map_err(invalid)?;

        Ok(Self { tenant, namespace })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn local_name(&self) -> &str {
        &self.namespace
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.namespace)
    }
}

impl FromStr for NamespaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [tenant, namespace] => Self::new(*tenant, *namespace),
            _ => Err(Error::InvalidNamespaceName {
                name: s.to_owned(),
                reason: "expected <tenant>/<namespace>".to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for NamespaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<NamespaceName> for String {
    fn from(ns: NamespaceName) -> Self {
        ns.to_string()
    }
}

/// A parsed, validated topic identifier.
///
/// Immutable once parsed. Partitioned and non-partitioned references to the same logical topic compare
/// unequal but share [`namespace`](Self::namespace) and [`local_name`](Self::local_name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicName {
    domain: TopicDomain,
    namespace: NamespaceName,
    local_name: String,
    partition_index: Option<u32>,
}

impl TopicName {
    /// Build a topic name from its parts.
    pub fn new(
        domain: TopicDomain,
        namespace: NamespaceName,
        local_name: impl Into<String>,
    ) -> Result<Self> {
        let local_name = local_name.into();
        check_local_name(&local_name).map_err(|reason| Error::InvalidTopicName {
            name: format!("{domain}://{namespace}/{local_name}"),
            reason,
        })?;

        let (local_name, partition_index) = split_partition_suffix(&local_name);
        Ok(Self {
            domain,
            namespace,
            local_name: local_name.to_owned(),
            partition_index,
        })
    }

    pub fn domain(&self) -> TopicDomain {
        self.domain
    }

    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    pub fn tenant(&self) -> &str {
        self.namespace.tenant()
    }

    /// Local name without any partition suffix.
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn partition_index(&self) -> Option<u32> {
        self.partition_index
    }

    pub fn is_partition(&self) -> bool {
        self.partition_index.is_some()
    }

    /// Name of partition `index` of this logical topic.
    pub fn partition(&self, index: u32) -> Self {
        Self {
            partition_index: Some(index),
            ..self.clone()
        }
    }

    /// The logical (partitioned) topic this name belongs to.
    pub fn partitioned_topic_name(&self) -> Self {
        Self {
            partition_index: None,
            ..self.clone()
        }
    }

    /// Build a name from parts known to be valid, such as the fixed system topic names.
    pub(crate) fn from_parts_unchecked(
        domain: TopicDomain,
        namespace: NamespaceName,
        local_name: &str,
    ) -> Self {
        Self {
            domain,
            namespace,
            local_name: local_name.to_owned(),
            partition_index: None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.domain == TopicDomain::Persistent
    }

    /// Whether this names one of the internal policy-event topics.
    pub fn is_system_topic(&self) -> bool {
        crate::system_topic::EventCategory::ALL
            .iter()
            .any(|c| c.local_name() == self.local_name)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.domain, self.namespace, self.local_name)?;
        if let Some(index) = self.partition_index {
            write!(f, "{PARTITIONED_TOPIC_SUFFIX}{index}")?;
        }
        Ok(())
    }
}

impl FromStr for TopicName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidTopicName {
            name: s.to_owned(),
            reason,
        };

        let (domain, rest, explicit_domain) = match s.split_once("://") {
            Some((domain, rest)) => (domain.parse().map_err(invalid)?, rest, true),
            None => (TopicDomain::Persistent, s, false),
        };

        let (tenant, namespace, local_name) = match rest.split('/').collect::<Vec<_>>().as_slice()
        {
            [local_name] if !explicit_domain => (PUBLIC_TENANT, DEFAULT_NAMESPACE, *local_name),
            [tenant, namespace, local_name] => (*tenant, *namespace, *local_name),
            _ => {
                return Err(invalid(
                    "expected <domain>://<tenant>/<namespace>/<topic>".to_owned(),
                ));
            }
        };

        check_named_entity("tenant", tenant).map_err(invalid)?;
        check_named_entity("namespace", namespace).map_err(invalid)?;
        check_local_name(local_name).map_err(invalid)?;

        let (local_name, partition_index) = split_partition_suffix(local_name);
        Ok(Self {
            domain,
            namespace: NamespaceName {
                tenant: tenant.to_owned(),
                namespace: namespace.to_owned(),
            },
            local_name: local_name.to_owned(),
            partition_index,
        })
    }
}

impl TryFrom<String> for TopicName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TopicName> for String {
    fn from(topic: TopicName) -> Self {
        topic.to_string()
    }
}

/// Tenants and namespaces are restricted to `[-=:.\w]+`.
fn check_named_entity(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must not be empty"));
    }

    match value
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '=' | ':' | '.')))
    {
        Some(c) => Err(format!("{kind} contains disallowed character {c:?}")),
        None => Ok(()),
    }
}

fn check_local_name(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("topic must not be empty".to_owned());
    }

    match value.chars().find(|c| c.is_control() || c.is_whitespace() || *c == '/') {
        Some(c) => Err(format!("topic contains disallowed character {c:?}")),
        None => Ok(()),
    }
}

/// `foo-partition-3` -> (`foo`, `Some(3)`). A non-numeric suffix is kept as part of the name.
fn split_partition_suffix(local_name: &str) -> (&str, Option<u32>) {
    match local_name.rsplit_once(PARTITIONED_TOPIC_SUFFIX) {
        Some((base, index)) if !base.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => {
            match index.parse() {
                Ok(index) => (base, Some(index)),
                Err(_) => (local_name, None),
            }
        }
        _ => (local_name, None),
    }
}
