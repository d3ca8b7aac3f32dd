use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Error, ExpectedVersion, MetadataStore, Result, SessionId, Stat, VersionedValue};

/// In-process [`MetadataStore`] shared by every broker of a test cluster.
///
/// Besides the store semantics it allows injecting failures (`set_available`, `set_latency`) and plays
/// the role of the external liveness mechanism through [`expire_session`](Self::expire_session).
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    records: BTreeMap<String, VersionedValue>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every operation fails with [`Error::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Drop every record bound to `session`, returning how many were removed.
    pub fn expire_session(&self, session: &SessionId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, v| v.stat.session.as_ref() != Some(session));
        let removed = before - inner.records.len();
        info!(session = session.0.as_str(), removed, "expired metadata session");
        removed
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("store is offline".to_owned()));
        }
        Ok(())
    }
}

fn check(path: &str, current: Option<&VersionedValue>, expected: ExpectedVersion) -> Result<()> {
    let ok = match (expected, current) {
        (ExpectedVersion::Any, _) => true,
        (ExpectedVersion::Absent, current) => current.is_none(),
        (ExpectedVersion::Exact(v), Some(current)) => current.stat.version == v,
        (ExpectedVersion::Exact(_), None) => false,
    };

    if ok {
        Ok(())
    } else {
        Err(Error::BadVersion {
            path: path.to_owned(),
        })
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, path: &str) -> Result<Option<VersionedValue>> {
        self.enter().await?;
        Ok(self.inner.lock().records.get(path).cloned())
    }

    async fn put(
        &self,
        path: &str,
        value: Bytes,
        expected: ExpectedVersion,
        session: Option<&SessionId>,
    ) -> Result<Stat> {
        self.enter().await?;

        let mut inner = self.inner.lock();
        check(path, inner.records.get(path), expected)?;

        inner.revision += 1;
        let stat = Stat {
            version: inner.revision,
            session: session.cloned(),
        };
        inner.records.insert(
            path.to_owned(),
            VersionedValue {
                value,
                stat: stat.clone(),
            },
        );

        debug!(path, version = stat.version, "stored record");
        Ok(stat)
    }

    async fn delete(&self, path: &str, expected: ExpectedVersion) -> Result<()> {
        self.enter().await?;

        let mut inner = self.inner.lock();
        if !inner.records.contains_key(path) {
            return match expected {
                ExpectedVersion::Exact(_) => Err(Error::BadVersion {
                    path: path.to_owned(),
                }),
                _ => Ok(()),
            };
        }

        check(path, inner.records.get(path), expected)?;
        inner.records.remove(path);
        debug!(path, "deleted record");
        Ok(())
    }
}
