//! Bundle ownership, recorded in the metadata store.
//!
//! At most one broker owns a bundle at any time. Ownership is taken by a conditional create of the bundle's
//! record and lasts until the owner releases it or its metadata session expires; nothing in here expires
//! records on its own. Conflicting acquisitions are never retried internally, the caller decides what to
//! do with the winner.
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    listener::{self, AdvertisedListener, ListenerRegistry, Protocol},
    naming::bundle::NamespaceBundle,
    store::{self, ExpectedVersion, MetadataStore, SessionId},
};

pub use self::bundles::NamespaceBundleFactory;

mod bundles;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Ownership directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Lost the ownership race for bundle {bundle}")]
    OwnershipConflict { bundle: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Self {
        Self::DirectoryUnavailable(e.to_string())
    }
}

/// The broker owning a bundle, as recorded in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerInfo {
    pub broker_id: String,
    pub service_url: Option<Url>,
    pub service_url_tls: Option<Url>,
    pub http_url: Option<Url>,
    pub https_url: Option<Url>,

    /// Named listeners of the owner, so that redirects can address it on the listener a client asked for.
    #[serde(default)]
    pub advertised_listeners: BTreeMap<String, AdvertisedListener>,

    /// Store version of the ownership record.
    #[serde(skip)]
    pub lease_version: u64,
}

impl OwnerInfo {
    /// Describe a broker advertising `listeners`. The lease version is assigned on acquisition.
    pub fn new(broker_id: impl Into<String>, listeners: &ListenerRegistry) -> Self {
        let default = listeners.default_listener();
        Self {
            broker_id: broker_id.into(),
            service_url: default.broker_service_url.clone(),
            service_url_tls: default.broker_service_url_tls.clone(),
            http_url: default.broker_http_url.clone(),
            https_url: default.broker_https_url.clone(),
            advertised_listeners: listeners.named().clone(),
            lease_version: 0,
        }
    }

    pub fn default_listener(&self) -> AdvertisedListener {
        AdvertisedListener {
            broker_service_url: self.service_url.clone(),
            broker_service_url_tls: self.service_url_tls.clone(),
            broker_http_url: self.http_url.clone(),
            broker_https_url: self.https_url.clone(),
        }
    }

    /// Endpoints of this owner on the listener called `name` (or the default one).
    pub fn select_listener(
        &self,
        name: Option<&str>,
        protocol: Protocol,
    ) -> Result<AdvertisedListener, listener::Error> {
        let default = self.default_listener();
        listener::select(&default, &self.advertised_listeners, name, protocol).cloned()
    }
}

/// Finds and asserts bundle ownership on behalf of one broker.
#[derive(Debug)]
pub struct OwnershipDirectory {
    store: Arc<dyn MetadataStore>,

    /// Session all ownership records of this broker are bound to.
    session: SessionId,

    /// What this broker writes into the records it creates.
    self_info: OwnerInfo,

    /// Upper bound for a single metadata store round trip.
    operation_timeout: Duration,

    /// Bundles this broker acquired and has not released yet.
    owned: Mutex<BTreeMap<NamespaceBundle, OwnerInfo>>,
}

impl OwnershipDirectory {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        session: SessionId,
        self_info: OwnerInfo,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            session,
            self_info,
            operation_timeout,
            owned: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.self_info.broker_id
    }

    pub fn self_info(&self) -> &OwnerInfo {
        &self.self_info
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn is_self(&self, owner: &OwnerInfo) -> bool {
        owner.broker_id == self.self_info.broker_id
    }

    /// Current owner of `bundle`, if any.
    pub async fn find_owner(&self, bundle: &NamespaceBundle) -> Result<Option<OwnerInfo>> {
        let path = bundle_path(bundle);
        let record = self.call(self.store.get(&path)).await?;

        match record {
            None => Ok(None),
            Some(record) => {
                let mut owner: OwnerInfo = store::decode(&path, &record.value)?;
                owner.lease_version = record.stat.version;
                Ok(Some(owner))
            }
        }
    }

    /// Try to become the owner of `bundle`.
    ///
    /// Returns this broker's [`OwnerInfo`] with a fresh lease version when the conditional create wins,
    /// otherwise the broker that currently holds the bundle.
    pub async fn acquire_ownership(&self, bundle: &NamespaceBundle) -> Result<OwnerInfo> {
        let path = bundle_path(bundle);
        let value = store::encode(&path, &self.self_info)?;

        let attempt = self
            .call(
                self.store
                    .put(&path, value, ExpectedVersion::Absent, Some(&self.session)),
            )
            .await;

        match attempt {
            Ok(stat) => {
                let owner = OwnerInfo {
                    lease_version: stat.version,
                    ..self.self_info.clone()
                };
                self.owned.lock().insert(bundle.clone(), owner.clone());
                info!(
                    bundle = %bundle,
                    broker = owner.broker_id.as_str(),
                    lease_version = owner.lease_version,
                    "acquired bundle ownership",
                );
                Ok(owner)
            }
            Err(store::Error::BadVersion { .. }) => match self.find_owner(bundle).await? {
                Some(owner) => {
                    if self.is_self(&owner) {
                        self.owned.lock().insert(bundle.clone(), owner.clone());
                    }
                    debug!(
                        bundle = %bundle,
                        owner = owner.broker_id.as_str(),
                        "bundle already owned",
                    );
                    Ok(owner)
                }
                // the winner released in between, let the caller start over
                None => Err(Error::OwnershipConflict {
                    bundle: bundle.to_string(),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Give up `bundle` if this broker still holds it.
    ///
    /// Best effort: failures are logged and the record is left to expire with the session. Returns whether a
    /// record was removed.
    pub async fn release_ownership(&self, bundle: &NamespaceBundle) -> bool {
        let held = self.owned.lock().remove(bundle);
        let Some(held) = held else {
            debug!(bundle = %bundle, "release of bundle not owned by this broker");
            return false;
        };

        let path = bundle_path(bundle);
        match self
            .call(
                self.store
                    .delete(&path, ExpectedVersion::Exact(held.lease_version)),
            )
            .await
        {
            Ok(()) => {
                info!(
                    bundle = %bundle,
                    lease_version = held.lease_version,
                    "released bundle ownership",
                );
                true
            }
            Err(e) => {
                warn!(
                    bundle = %bundle,
                    e = %e,
                    "failed to release bundle ownership, leaving it to session expiry",
                );
                false
            }
        }
    }

    /// Release every bundle this broker owns.
    pub async fn release_all(&self) {
        for bundle in self.owned_bundles() {
            self.release_ownership(&bundle).await;
        }
    }

    pub fn owned_bundles(&self) -> Vec<NamespaceBundle> {
        self.owned.lock().keys().cloned().collect()
    }

    pub fn is_owned_locally(&self, bundle: &NamespaceBundle) -> bool {
        self.owned.lock().contains_key(bundle)
    }

    /// Run a store operation bounded by the operation timeout.
    async fn call<T, F>(&self, fut: F) -> store::Result<T>
    where
        F: Future<Output = store::Result<T>> + Send,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(store::Error::Unavailable(format!(
                "no response within {:?}",
                self.operation_timeout
            ))),
        }
    }
}

/// `/namespace/<tenant>/<namespace>/<range>`
pub fn bundle_path(bundle: &NamespaceBundle) -> String {
    format!("/namespace/{}/{}", bundle.namespace(), bundle.range())
}
