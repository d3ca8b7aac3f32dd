//! Advertised listeners: the named network identities of a broker.
//!
//! A broker advertises one unnamed default listener and any number of named listeners, each with up to one
//! URI per protocol. A lookup names the listener it wants through a query parameter or a header; the
//! answer is always taken from exactly one listener, never stitched together from several.
use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Query parameter carrying the requested listener name.
pub const LISTENER_NAME_PARAM: &str = "listenerName";

/// Header carrying the requested listener name.
pub const LISTENER_NAME_HEADER: &str = "X-Pulsar-ListenerName";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Listener {listener} has no URI for protocol \"{protocol}\"")]
    NoListenerForProtocol {
        listener: ListenerLabel,
        protocol: String,
    },

    #[error("Listener {0} does not advertise any URI")]
    EmptyListener(ListenerLabel),
}

/// Either the default listener or a named one, for error messages and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerLabel {
    Default,
    Named(String),
}

impl fmt::Display for ListenerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("<default>"),
            Self::Named(name) => write!(f, "\"{name}\""),
        }
    }
}

/// The four protocols a listener can advertise a URI for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Plaintext binary protocol.
    #[default]
    Pulsar,

    /// Encrypted binary protocol.
    PulsarSsl,

    Http,

    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pulsar => "pulsar",
            Self::PulsarSsl => "pulsar+ssl",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pulsar" => Ok(Self::Pulsar),
            "pulsar+ssl" => Ok(Self::PulsarSsl),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unrecognized protocol \"{other}\"")),
        }
    }
}

/// URIs one listener advertises. Immutable after broker startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedListener {
    /// The broker service URI without TLS.
    pub broker_service_url: Option<Url>,

    /// The broker service URI with TLS.
    pub broker_service_url_tls: Option<Url>,

    /// The web service URI without TLS.
    pub broker_http_url: Option<Url>,

    /// The web service URI with TLS.
    pub broker_https_url: Option<Url>,
}

impl AdvertisedListener {
    pub fn uri_for(&self, protocol: Protocol) -> Option<&Url> {
        match protocol {
            Protocol::Pulsar => self.broker_service_url.as_ref(),
            Protocol::PulsarSsl => self.broker_service_url_tls.as_ref(),
            Protocol::Http => self.broker_http_url.as_ref(),
            Protocol::Https => self.broker_https_url.as_ref(),
        }
    }

    /// Unrecognized protocol identifiers never have a URI.
    pub fn has_uri_for_protocol(&self, protocol: &str) -> bool {
        protocol
            .parse::<Protocol>()
            .map(|p| self.uri_for(p).is_some())
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.broker_service_url.is_none()
            && self.broker_service_url_tls.is_none()
            && self.broker_http_url.is_none()
            && self.broker_https_url.is_none()
    }
}

/// Listener name requested by a lookup.
///
/// An explicit parameter wins over the header; empty values count as absent. `None` selects the default
/// listener.
pub fn requested_listener_name<'a>(
    param: Option<&'a str>,
    header: Option<&'a str>,
) -> Option<&'a str> {
    param
        .filter(|s| !s.is_empty())
        .or_else(|| header.filter(|s| !s.is_empty()))
}

/// Pick the listener called `name` (or the default one) and check it can serve `protocol`.
///
/// An unknown name is treated like a listener without any URI.
pub fn select<'a>(
    default: &'a AdvertisedListener,
    named: &'a BTreeMap<String, AdvertisedListener>,
    name: Option<&str>,
    protocol: Protocol,
) -> Result<&'a AdvertisedListener, Error> {
    let (label, listener) = match name {
        None => (ListenerLabel::Default, Some(default)),
        Some(name) => (ListenerLabel::Named(name.to_owned()), named.get(name)),
    };

    match listener {
        Some(listener) if listener.uri_for(protocol).is_some() => Ok(listener),
        _ => Err(Error::NoListenerForProtocol {
            listener: label,
            protocol: protocol.to_string(),
        }),
    }
}

/// Static table of the listeners this broker advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerRegistry {
    default: AdvertisedListener,
    named: BTreeMap<String, AdvertisedListener>,
}

impl ListenerRegistry {
    pub fn new(default: AdvertisedListener) -> Self {
        Self {
            default,
            named: BTreeMap::new(),
        }
    }

    pub fn with_listener(mut self, name: impl Into<String>, listener: AdvertisedListener) -> Self {
        self.named.insert(name.into(), listener);
        self
    }

    pub fn default_listener(&self) -> &AdvertisedListener {
        &self.default
    }

    pub fn named(&self) -> &BTreeMap<String, AdvertisedListener> {
        &self.named
    }

    pub fn get(&self, name: Option<&str>) -> Option<&AdvertisedListener> {
        match name {
            None => Some(&self.default),
            Some(name) => self.named.get(name),
        }
    }

    pub fn select(
        &self,
        name: Option<&str>,
        protocol: Protocol,
    ) -> Result<&AdvertisedListener, Error> {
        select(&self.default, &self.named, name, protocol)
    }

    /// Every advertised listener must carry at least one URI.
    pub fn validate(&self) -> Result<(), Error> {
        if self.default.is_empty() {
            return Err(Error::EmptyListener(ListenerLabel::Default));
        }
        match self.named.iter().find(|(_, l)| l.is_empty()) {
            Some((name, _)) => Err(Error::EmptyListener(ListenerLabel::Named(name.clone()))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn url(s: &str) -> Option<Url> {
        Some(Url::parse(s).unwrap())
    }

    fn internal() -> AdvertisedListener {
        AdvertisedListener {
            broker_service_url: url("pulsar://10.0.0.1:6650"),
            broker_service_url_tls: None,
            broker_http_url: url("http://10.0.0.1:8080"),
            broker_https_url: None,
        }
    }

    fn external() -> AdvertisedListener {
        AdvertisedListener {
            broker_service_url: None,
            broker_service_url_tls: url("pulsar+ssl://broker.example.com:6651"),
            broker_http_url: None,
            broker_https_url: url("https://broker.example.com:8443"),
        }
    }

    #[test]
    fn test_has_uri_for_protocol() {
        let listener = internal();
        assert!(listener.has_uri_for_protocol("pulsar"));
        assert!(!listener.has_uri_for_protocol("pulsar+ssl"));
        assert!(listener.has_uri_for_protocol("http"));
        assert!(!listener.has_uri_for_protocol("https"));

        let listener = external();
        assert!(!listener.has_uri_for_protocol("pulsar"));
        assert!(listener.has_uri_for_protocol("pulsar+ssl"));
        assert!(!listener.has_uri_for_protocol("http"));
        assert!(listener.has_uri_for_protocol("https"));

        for protocol in ["", "kafka", "PULSAR", "pulsar+tls", "ws"] {
            assert!(!listener.has_uri_for_protocol(protocol));
            assert!(!internal().has_uri_for_protocol(protocol));
        }
    }

    #[test]
    fn test_requested_listener_name() {
        assert_eq!(
            requested_listener_name(Some("query"), Some("header")),
            Some("query")
        );
        assert_eq!(requested_listener_name(None, Some("header")), Some("header"));
        assert_eq!(requested_listener_name(Some(""), Some("header")), Some("header"));
        assert_eq!(requested_listener_name(Some("query"), None), Some("query"));
        assert_eq!(requested_listener_name(None, Some("")), None);
        assert_eq!(requested_listener_name(None, None), None);
    }

    #[test]
    fn test_select_does_not_mix_listeners() {
        let registry = ListenerRegistry::new(internal()).with_listener("external", external());

        let chosen = registry.select(Some("external"), Protocol::PulsarSsl).unwrap();
        assert_eq!(chosen, &external());

        // the default listener has a plaintext URI, but the external one does not
        assert_matches!(
            registry.select(Some("external"), Protocol::Pulsar),
            Err(Error::NoListenerForProtocol { listener: ListenerLabel::Named(name), protocol })
                if name == "external" && protocol == "pulsar"
        );

        assert_eq!(registry.select(None, Protocol::Pulsar).unwrap(), &internal());
        assert_matches!(
            registry.select(None, Protocol::Https),
            Err(Error::NoListenerForProtocol {
                listener: ListenerLabel::Default,
                ..
            })
        );

        assert_matches!(
            registry.select(Some("missing"), Protocol::Pulsar),
            Err(Error::NoListenerForProtocol { .. })
        );
    }

    #[test]
    fn test_validate() {
        assert!(ListenerRegistry::new(internal()).validate().is_ok());
        assert_matches!(
            ListenerRegistry::default().validate(),
            Err(Error::EmptyListener(ListenerLabel::Default))
        );
        assert_matches!(
            ListenerRegistry::new(internal())
                .with_listener("broken", AdvertisedListener::default())
                .validate(),
            Err(Error::EmptyListener(ListenerLabel::Named(name))) if name == "broken"
        );
    }

    #[test]
    fn test_serde_field_names() {
        let json = serde_json::to_value(internal()).unwrap();
        assert_eq!(json["brokerServiceUrl"], "pulsar://10.0.0.1:6650");
        assert!(json["brokerServiceUrlTls"].is_null());
    }
}
