use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Result;
use crate::{
    naming::{
        NamespaceName, TopicName,
        bundle::{BundlesData, NamespaceBundle, NamespaceBundles},
    },
    store::{self, ExpectedVersion, MetadataStore},
};

/// Namespace-level record holding the bundle layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NamespaceRecord {
    bundles: BundlesData,
}

/// Resolves the bundle layout of namespaces.
///
/// Layouts live in the metadata store so every broker hashes a topic into the same bundle. The first lookup in
/// a namespace without a stored layout registers `default_bundles` equal ranges; whichever registration wins
/// is the layout for good, also against a later [`create_namespace`](Self::create_namespace).
#[derive(Debug)]
pub struct NamespaceBundleFactory {
    store: Arc<dyn MetadataStore>,
    default_bundles: u32,
    operation_timeout: Duration,
    cache: RwLock<HashMap<NamespaceName, Arc<NamespaceBundles>>>,
}

impl NamespaceBundleFactory {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        default_bundles: u32,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            default_bundles,
            operation_timeout,
            cache: Default::default(),
        }
    }

    /// Register `namespace` with `num_bundles` equal bundles.
    ///
    /// If the namespace already has a layout, that layout wins and is returned.
    pub async fn create_namespace(
        &self,
        namespace: &NamespaceName,
        num_bundles: u32,
    ) -> Result<Arc<NamespaceBundles>> {
        match self
            .try_register(namespace, &BundlesData::even(num_bundles))
            .await?
        {
            Some(bundles) => {
                info!(namespace = %namespace, num_bundles, "created namespace");
                Ok(bundles)
            }
            None => {
                debug!(namespace = %namespace, "namespace already exists");
                self.bundles(namespace).await
            }
        }
    }

    pub async fn bundles(&self, namespace: &NamespaceName) -> Result<Arc<NamespaceBundles>> {
        if let Some(bundles) = self.cache.read().get(namespace) {
            return Ok(Arc::clone(bundles));
        }

        loop {
            if let Some(bundles) = self.load(namespace).await? {
                return Ok(bundles);
            }

            let default = BundlesData::even(self.default_bundles);
            if let Some(bundles) = self.try_register(namespace, &default).await? {
                info!(
                    namespace = %namespace,
                    num_bundles = self.default_bundles,
                    "registered default bundle layout",
                );
                return Ok(bundles);
            }
        }
    }

    /// The bundle owning `topic`.
    pub async fn bundle_for(&self, topic: &TopicName) -> Result<NamespaceBundle> {
        let bundles = self.bundles(topic.namespace()).await?;
        Ok(bundles.find_bundle(topic).clone())
    }

    async fn load(&self, namespace: &NamespaceName) -> Result<Option<Arc<NamespaceBundles>>> {
        let path = namespace_path(namespace);
        match self.timed(self.store.get(&path)).await? {
            Some(record) => {
                let record: NamespaceRecord = store::decode(&path, &record.value)?;
                Ok(Some(self.cache_layout(namespace, &record.bundles)))
            }
            None => Ok(None),
        }
    }

    /// Store `data` as the layout of `namespace` unless it already has one. `None` if it has.
    async fn try_register(
        &self,
        namespace: &NamespaceName,
        data: &BundlesData,
    ) -> Result<Option<Arc<NamespaceBundles>>> {
        let path = namespace_path(namespace);
        let record = NamespaceRecord {
            bundles: data.clone(),
        };
        let value = store::encode(&path, &record)?;

        match self
            .timed(self.store.put(&path, value, ExpectedVersion::Absent, None))
            .await
        {
            Ok(_) => Ok(Some(self.cache_layout(namespace, &record.bundles))),
            Err(store::Error::BadVersion { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn cache_layout(&self, namespace: &NamespaceName, data: &BundlesData) -> Arc<NamespaceBundles> {
        let bundles = Arc::new(NamespaceBundles::new(namespace.clone(), data));
        self.cache
            .write()
            .insert(namespace.clone(), Arc::clone(&bundles));
        bundles
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

/// `/admin/policies/<tenant>/<namespace>`
fn namespace_path(namespace: &NamespaceName) -> String {
    format!("/admin/policies/{namespace}")
}
