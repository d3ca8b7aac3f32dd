//! Strongly consistent, versioned metadata store.
//!
//! The store is an external collaborator; this module only fixes the interface the control plane needs
//! from it. All cross-broker mutual exclusion is expressed as conditional writes against it, never as an
//! in-process lock.
//!
//! Versions are store-wide revisions: every successful write yields a version larger than any version
//! handed out before, so a record that is deleted and re-created never reuses an old version.
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use self::memory::MemoryMetadataStore;

mod memory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Version check failed for \"{path}\"")]
    BadVersion { path: String },

    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot decode record at \"{path}\": {reason}")]
    Decode { path: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Precondition of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Unconditional.
    Any,

    /// The record must not exist.
    Absent,

    /// The record must exist with exactly this version.
    Exact(u64),
}

/// Identifies the liveness session a broker holds with the store.
///
/// Records written under a session are removed by the store when that session expires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub version: u64,
    pub session: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Bytes,
    pub stat: Stat,
}

#[async_trait]
pub trait MetadataStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<VersionedValue>>;

    /// Write `value` if `expected` holds. Passing a session makes the record ephemeral.
    async fn put(
        &self,
        path: &str,
        value: Bytes,
        expected: ExpectedVersion,
        session: Option<&SessionId>,
    ) -> Result<Stat>;

    /// Remove the record if `expected` holds. Removing an absent record is not an error unless a specific
    /// version was expected.
    async fn delete(&self, path: &str, expected: ExpectedVersion) -> Result<()>;
}

pub(crate) fn encode<T: Serialize>(path: &str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::Decode {
            path: path.to_owned(),
            reason: e.to_string(),
        })
}

pub(crate) fn decode<T: DeserializeOwned>(path: &str, value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| Error::Decode {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}
