//! Wiring of the control-plane components of one broker.
use std::sync::Arc;

use tracing::info;

use crate::{
    config::BrokerConfig,
    error::Result,
    event_log::EventLog,
    intercept::{BrokerContext, BrokerInterceptor, InterceptError, NoopInterceptor, rejection},
    listener::ListenerRegistry,
    lookup::LookupService,
    naming::{NamespaceName, bundle::NamespaceBundles},
    ownership::{NamespaceBundleFactory, OwnerInfo, OwnershipDirectory},
    policies::{PolicyCache, PolicyService},
    store::{MetadataStore, SessionId},
    system_topic::SystemTopicFactory,
};

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    broker_id: String,
    store: Arc<dyn MetadataStore>,
    log: Arc<dyn EventLog>,
    listeners: ListenerRegistry,
    config: BrokerConfig,
    interceptor: Arc<dyn BrokerInterceptor>,
    session: Option<SessionId>,
}

impl BrokerBuilder {
    /// Create a new [`BrokerBuilder`] for the broker called `broker_id`.
    pub fn new(
        broker_id: impl Into<String>,
        store: Arc<dyn MetadataStore>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            broker_id: broker_id.into(),
            store,
            log,
            listeners: ListenerRegistry::default(),
            config: BrokerConfig::default(),
            interceptor: Arc::new(NoopInterceptor),
            session: None,
        }
    }

    /// Listeners advertised by this broker. At least the default listener must carry a URI.
    pub fn with_listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn BrokerInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Metadata session to bind ownership records to. Defaults to a fresh session per broker start.
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Build [`Broker`].
    pub async fn build(self) -> Result<Broker> {
        self.listeners.validate()?;

        let context = BrokerContext {
            broker_id: self.broker_id.clone(),
            listeners: self.listeners.clone(),
        };
        if let Some(reason) = rejection("initialize", self.interceptor.initialize(&context)) {
            return Err(InterceptError::Rejected(reason).into());
        }

        let session = self.session.unwrap_or_else(|| {
            SessionId(format!("{}-{:016x}", self.broker_id, rand::random::<u64>()))
        });
        let timeout = self.config.lookup_timeout;

        let directory = Arc::new(OwnershipDirectory::new(
            Arc::clone(&self.store),
            session,
            OwnerInfo::new(self.broker_id.clone(), &self.listeners),
            timeout,
        ));
        let bundles = Arc::new(NamespaceBundleFactory::new(
            Arc::clone(&self.store),
            self.config.default_bundles,
            timeout,
        ));
        let system_topics = Arc::new(SystemTopicFactory::new(
            Arc::clone(&self.store),
            Arc::clone(&self.log),
            self.config.system_topic.clone(),
            timeout,
        ));
        let policies = Arc::new(PolicyService::new(
            Arc::clone(&system_topics),
            Arc::new(PolicyCache::new()),
        ));
        let lookup = Arc::new(LookupService::new(
            Arc::clone(&directory),
            Arc::clone(&bundles),
            Arc::clone(&policies),
            Arc::clone(&self.interceptor),
            &self.config,
        ));

        info!(
            broker = self.broker_id.as_str(),
            session = directory.session().0.as_str(),
            listeners = self.listeners.named().len(),
            "broker started"
        );

        Ok(Broker {
            broker_id: self.broker_id,
            listeners: self.listeners,
            directory,
            bundles,
            system_topics,
            policies,
            lookup,
            interceptor: self.interceptor,
        })
    }
}

impl std::fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("broker_id", &self.broker_id)
            .finish_non_exhaustive()
    }
}

/// The control plane of one broker.
#[derive(Debug)]
pub struct Broker {
    broker_id: String,
    listeners: ListenerRegistry,
    directory: Arc<OwnershipDirectory>,
    bundles: Arc<NamespaceBundleFactory>,
    system_topics: Arc<SystemTopicFactory>,
    policies: Arc<PolicyService>,
    lookup: Arc<LookupService>,
    interceptor: Arc<dyn BrokerInterceptor>,
}

impl Broker {
    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn lookup(&self) -> &Arc<LookupService> {
        &self.lookup
    }

    pub fn ownership(&self) -> &Arc<OwnershipDirectory> {
        &self.directory
    }

    pub fn bundles(&self) -> &Arc<NamespaceBundleFactory> {
        &self.bundles
    }

    pub fn system_topics(&self) -> &Arc<SystemTopicFactory> {
        &self.system_topics
    }

    pub fn policies(&self) -> &Arc<PolicyService> {
        &self.policies
    }

    pub fn session(&self) -> &SessionId {
        self.directory.session()
    }

    /// Register `namespace` with `num_bundles` bundles, keeping an existing layout.
    pub async fn create_namespace(
        &self,
        namespace: &NamespaceName,
        num_bundles: u32,
    ) -> Result<Arc<NamespaceBundles>> {
        Ok(self.bundles.create_namespace(namespace, num_bundles).await?)
    }

    /// Stop following system topics, give up every owned bundle and close the interceptor.
    pub async fn close(&self) {
        self.policies.close().await;
        self.directory.release_all().await;
        self.interceptor.close();
        info!(broker = self.broker_id.as_str(), "broker closed");
    }
}
