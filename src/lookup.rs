//! Topic lookup: which broker serves a topic, and on which address.
//!
//! A lookup hashes the topic into its namespace bundle and consults the ownership directory. The broker
//! that owns the bundle answers authoritatively; any other broker redirects the client to the owner. An
//! unowned bundle is acquired on the spot, so a lookup never answers with a broker that merely might own
//! the bundle. Addresses are always taken from a single advertised listener of the owner.
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::BrokerConfig,
    intercept::BrokerInterceptor,
    listener::{self, AdvertisedListener, Protocol, requested_listener_name},
    naming::{self, TopicName, bundle::NamespaceBundle},
    ownership::{self, NamespaceBundleFactory, OwnerInfo, OwnershipDirectory},
    policies::{AutoTopicCreation, AutoTopicCreationDefaults, PolicyService},
};

pub use self::command::{
    Command, CommandLookupTopic, CommandLookupTopicResponse, CommandResponse, ConnectionContext,
};
pub use self::web::LOOKUP_PATH_PREFIX;

mod command;
mod web;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error(transparent)]
    InvalidTopicName(#[from] naming::Error),

    #[error("Ownership directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Lost the ownership race for bundle {bundle}")]
    OwnershipConflict { bundle: String },

    #[error("Listener {listener} has no URI for protocol \"{protocol}\"")]
    NoListenerForProtocol { listener: String, protocol: String },

    #[error("No broker available to own bundle {bundle}")]
    NoOwnerAvailable { bundle: String },

    #[error("Lookup rejected: {0}")]
    Rejected(String),
}

impl LookupError {
    /// Stable identifier reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTopicName(_) => "InvalidTopicName",
            Self::DirectoryUnavailable(_) => "DirectoryUnavailable",
            Self::OwnershipConflict { .. } => "OwnershipConflict",
            Self::NoListenerForProtocol { .. } => "NoListenerForProtocol",
            Self::NoOwnerAvailable { .. } => "NoOwnerAvailable",
            Self::Rejected(_) => "Rejected",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTopicName(_) | Self::NoListenerForProtocol { .. } => StatusCode::BAD_REQUEST,
            Self::OwnershipConflict { .. } => StatusCode::CONFLICT,
            Self::DirectoryUnavailable(_) | Self::NoOwnerAvailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Rejected(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Whether repeating the same lookup later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable(_) | Self::OwnershipConflict { .. } | Self::NoOwnerAvailable { .. }
        )
    }
}

impl From<ownership::Error> for LookupError {
    fn from(e: ownership::Error) -> Self {
        match e {
            ownership::Error::DirectoryUnavailable(reason) => Self::DirectoryUnavailable(reason),
            ownership::Error::OwnershipConflict { bundle } => Self::OwnershipConflict { bundle },
        }
    }
}

impl From<listener::Error> for LookupError {
    fn from(e: listener::Error) -> Self {
        match e {
            listener::Error::NoListenerForProtocol { listener, protocol } => {
                Self::NoListenerForProtocol {
                    listener: listener.to_string(),
                    protocol,
                }
            }
            listener::Error::EmptyListener(listener) => Self::NoListenerForProtocol {
                listener: listener.to_string(),
                protocol: String::new(),
            },
        }
    }
}

/// A topic lookup as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// Topic name as sent by the client, parsed by the lookup.
    pub topic: String,

    /// Set when the client was redirected here by the broker that last answered.
    pub authoritative: bool,

    /// Listener name from the request parameters.
    pub listener_name: Option<String>,

    /// Listener name from the request header, used when no parameter is present.
    pub listener_header: Option<String>,

    /// Protocol the client wants to connect with.
    pub protocol: Protocol,
}

impl LookupRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            authoritative: false,
            listener_name: None,
            listener_header: None,
            protocol: Protocol::default(),
        }
    }

    pub fn with_authoritative(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    pub fn with_listener_name(mut self, name: impl Into<String>) -> Self {
        self.listener_name = Some(name.into());
        self
    }

    pub fn with_listener_header(mut self, name: impl Into<String>) -> Self {
        self.listener_header = Some(name.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Answer to a lookup: the endpoints of one listener of the broker to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub service_url: Option<Url>,
    pub service_url_tls: Option<Url>,
    pub http_url: Option<Url>,
    pub https_url: Option<Url>,

    /// The client must pass this flag along when following a redirect.
    pub authoritative: bool,

    /// The endpoints belong to another broker which the client should ask next.
    pub redirect: bool,
}

impl LookupResponse {
    fn new(listener: AdvertisedListener, authoritative: bool, redirect: bool) -> Self {
        Self {
            service_url: listener.broker_service_url,
            service_url_tls: listener.broker_service_url_tls,
            http_url: listener.broker_http_url,
            https_url: listener.broker_https_url,
            authoritative,
            redirect,
        }
    }

    /// The endpoint for `protocol`, if the answering listener has one.
    pub fn url_for(&self, protocol: Protocol) -> Option<&Url> {
        match protocol {
            Protocol::Pulsar => self.service_url.as_ref(),
            Protocol::PulsarSsl => self.service_url_tls.as_ref(),
            Protocol::Http => self.http_url.as_ref(),
            Protocol::Https => self.https_url.as_ref(),
        }
    }
}

/// Who answers a lookup.
#[derive(Debug)]
enum Resolution {
    /// This broker owns the bundle.
    Local(OwnerInfo),

    /// Another broker owns the bundle.
    Redirect {
        owner: OwnerInfo,
        authoritative: bool,
    },
}

/// Resolves topic lookups for one broker.
#[derive(Debug)]
pub struct LookupService {
    directory: Arc<OwnershipDirectory>,
    bundles: Arc<NamespaceBundleFactory>,
    policies: Arc<PolicyService>,
    interceptor: Arc<dyn BrokerInterceptor>,
    allow_bundle_ownership: bool,
    auto_topic_creation: AutoTopicCreationDefaults,
}

impl LookupService {
    pub fn new(
        directory: Arc<OwnershipDirectory>,
        bundles: Arc<NamespaceBundleFactory>,
        policies: Arc<PolicyService>,
        interceptor: Arc<dyn BrokerInterceptor>,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            directory,
            bundles,
            policies,
            interceptor,
            allow_bundle_ownership: config.allow_bundle_ownership,
            auto_topic_creation: config.auto_topic_creation,
        }
    }

    pub async fn lookup(&self, request: &LookupRequest) -> Result<LookupResponse, LookupError> {
        let topic: TopicName = request.topic.parse()?;
        let listener_name = requested_listener_name(
            request.listener_name.as_deref(),
            request.listener_header.as_deref(),
        );

        let bundle = self.bundles.bundle_for(&topic).await?;
        let resolution = self.resolve(&bundle, request.authoritative).await?;

        let response = match resolution {
            Resolution::Local(owner) => LookupResponse::new(
                owner.select_listener(listener_name, request.protocol)?,
                true,
                false,
            ),
            Resolution::Redirect {
                owner,
                authoritative,
            } => LookupResponse::new(
                owner.select_listener(listener_name, request.protocol)?,
                authoritative,
                true,
            ),
        };

        debug!(
            topic = %topic,
            bundle = %bundle,
            listener = listener_name.unwrap_or_default(),
            redirect = response.redirect,
            authoritative = response.authoritative,
            "lookup resolved",
        );
        Ok(response)
    }

    /// How a topic that does not exist yet would be created in its namespace.
    pub fn auto_topic_creation(&self, topic: &TopicName) -> AutoTopicCreation {
        self.policies
            .cache()
            .auto_topic_creation(topic.namespace(), &self.auto_topic_creation)
    }

    pub(crate) fn interceptor(&self) -> &dyn BrokerInterceptor {
        self.interceptor.as_ref()
    }

    async fn resolve(
        &self,
        bundle: &NamespaceBundle,
        authoritative: bool,
    ) -> Result<Resolution, LookupError> {
        if let Some(owner) = self.directory.find_owner(bundle).await? {
            return Ok(if self.directory.is_self(&owner) {
                self.load_policies(bundle);
                Resolution::Local(owner)
            } else {
                Resolution::Redirect {
                    owner,
                    authoritative,
                }
            });
        }

        if !self.allow_bundle_ownership {
            return Err(LookupError::NoOwnerAvailable {
                bundle: bundle.to_string(),
            });
        }

        let owner = self.directory.acquire_ownership(bundle).await?;
        if self.directory.is_self(&owner) {
            self.load_policies(bundle);
            return Ok(Resolution::Local(owner));
        }

        if authoritative {
            // the client was sent here as the final hop; bouncing it again could loop
            Err(LookupError::OwnershipConflict {
                bundle: bundle.to_string(),
            })
        } else {
            Ok(Resolution::Redirect {
                owner,
                authoritative: true,
            })
        }
    }

    /// Warm the policy cache for the namespace of an owned bundle in the background, unless it is loaded.
    fn load_policies(&self, bundle: &NamespaceBundle) {
        if self.policies.is_loaded(bundle.namespace()) {
            return;
        }

        info!(bundle = %bundle, "serving bundle, loading namespace policies");
        let policies = Arc::clone(&self.policies);
        let namespace = bundle.namespace().clone();
        tokio::spawn(async move {
            if let Err(e) = policies.ensure_namespace(&namespace).await {
                warn!(namespace = %namespace, e = %e, "failed to load namespace policies");
            }
        });
    }
}
