use parking_lot::Once;
use pulsar_control::{
    Broker, BrokerBuilder,
    config::BrokerConfig,
    event_log::{EventLog, MemoryEventLog},
    listener::{AdvertisedListener, ListenerRegistry},
    naming::NamespaceName,
    store::{MemoryMetadataStore, MetadataStore},
};
use std::{sync::Arc, time::Duration};

/// Sensible test timeout.
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Brokers sharing one metadata store and one event log.
#[derive(Debug)]
pub struct TestCluster {
    pub store: Arc<MemoryMetadataStore>,
    pub log: Arc<MemoryEventLog>,
    pub brokers: Vec<Broker>,
}

impl TestCluster {
    /// Start `n` brokers called `broker-0`, `broker-1`, ...
    pub async fn start(n: usize, config: BrokerConfig) -> Self {
        let store = Arc::new(MemoryMetadataStore::new());
        let log = Arc::new(MemoryEventLog::new());

        let mut brokers = Vec::with_capacity(n);
        for i in 0..n {
            brokers.push(
                broker_builder(&format!("broker-{i}"), &store, &log)
                    .with_config(config.clone())
                    .build()
                    .await
                    .unwrap(),
            );
        }

        Self {
            store,
            log,
            brokers,
        }
    }

    #[allow(dead_code)]
    pub async fn close(self) {
        for broker in &self.brokers {
            broker.close().await;
        }
    }
}

/// Builder for a broker advertising [`listeners`] on the shared `store` and `log`.
pub fn broker_builder(
    broker_id: &str,
    store: &Arc<MemoryMetadataStore>,
    log: &Arc<MemoryEventLog>,
) -> BrokerBuilder {
    BrokerBuilder::new(
        broker_id,
        Arc::clone(store) as Arc<dyn MetadataStore>,
        Arc::clone(log) as Arc<dyn EventLog>,
    )
    .with_listeners(listeners(broker_id))
}

/// A default listener with plaintext URIs plus an `internal` and an `external` named listener.
pub fn listeners(broker_id: &str) -> ListenerRegistry {
    ListenerRegistry::new(AdvertisedListener {
        broker_service_url: Some(format!("pulsar://{broker_id}:6650").parse().unwrap()),
        broker_http_url: Some(format!("http://{broker_id}:8080").parse().unwrap()),
        ..Default::default()
    })
    .with_listener(
        "internal",
        AdvertisedListener {
            broker_service_url: Some(format!("pulsar://{broker_id}.internal:6660").parse().unwrap()),
            broker_http_url: Some(format!("http://{broker_id}.internal:8090").parse().unwrap()),
            ..Default::default()
        },
    )
    .with_listener(
        "external",
        AdvertisedListener {
            broker_service_url_tls: Some(
                format!("pulsar+ssl://{broker_id}.example.com:6651")
                    .parse()
                    .unwrap(),
            ),
            broker_https_url: Some(format!("https://{broker_id}.example.com:8443").parse().unwrap()),
            ..Default::default()
        },
    )
}

/// Generated random namespace for testing.
#[allow(dead_code)]
pub fn random_namespace() -> NamespaceName {
    format!("prop/ns-{}", uuid::Uuid::new_v4()).parse().unwrap()
}

/// Poll `check` until it holds, failing after [`TEST_TIMEOUT`].
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the `RUST_LOG` environment variable is
/// set. Does nothing if `RUST_LOG` is not set.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Start logging.
pub fn start_logging() {
    use tracing_log::LogTracer;
    use tracing_subscriber::{FmtSubscriber, filter::EnvFilter};

    LOG_SETUP.call_once(|| {
        LogTracer::init().unwrap();

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}
