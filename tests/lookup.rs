use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use assert_matches::assert_matches;
use http::{Request, StatusCode};
use pulsar_control::{
    config::BrokerConfig,
    event_log::MemoryEventLog,
    intercept::{BrokerContext, BrokerInterceptor, InterceptError},
    listener::{LISTENER_NAME_HEADER, Protocol},
    lookup::{
        Command, CommandLookupTopic, CommandResponse, ConnectionContext, LookupError,
        LookupRequest, LookupResponse,
    },
    naming::{NamespaceName, TopicName, bundle::topic_hash},
    store::MemoryMetadataStore,
};

mod test_helpers;
use test_helpers::{TestCluster, broker_builder, maybe_start_logging, random_namespace};

fn lookup_request(topic: &TopicName) -> LookupRequest {
    LookupRequest::new(topic.to_string())
}

#[tokio::test]
async fn test_lookup_in_namespace_with_two_bundles() {
    maybe_start_logging();

    let cluster = TestCluster::start(1, BrokerConfig::default()).await;
    let broker = &cluster.brokers[0];
    let ns: NamespaceName = "prop/ns-test".parse().unwrap();
    let bundles = broker.create_namespace(&ns, 2).await.unwrap();
    assert_eq!(bundles.bundles().len(), 2);

    // pick one topic per bundle
    let mut topics = Vec::new();
    for bundle in bundles.bundles() {
        let topic = (0..)
            .map(|i| {
                format!("persistent://prop/ns-test/t{i}")
                    .parse::<TopicName>()
                    .unwrap()
            })
            .find(|t| bundle.includes(topic_hash(t)))
            .unwrap();
        topics.push(topic);
    }

    for topic in &topics {
        let first = broker.lookup().lookup(&lookup_request(topic)).await.unwrap();
        let second = broker.lookup().lookup(&lookup_request(topic)).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.redirect);
        assert_eq!(
            first.service_url.as_ref().unwrap().as_str(),
            "pulsar://broker-0:6650"
        );
    }
    assert_eq!(broker.ownership().owned_bundles().len(), 2);

    cluster.close().await;
}

#[tokio::test]
async fn test_redirect_then_authoritative_answer() {
    maybe_start_logging();

    let cluster = TestCluster::start(2, BrokerConfig::default()).await;
    let (a, b) = (&cluster.brokers[0], &cluster.brokers[1]);
    let topic: TopicName = format!("persistent://{}/t", random_namespace()).parse().unwrap();

    a.lookup().lookup(&lookup_request(&topic)).await.unwrap();

    let redirect = b.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    assert!(redirect.redirect);
    assert_eq!(
        redirect.service_url.as_ref().unwrap().as_str(),
        "pulsar://broker-0:6650"
    );

    // the client follows the redirect to the owner
    let answer = a
        .lookup()
        .lookup(&lookup_request(&topic).with_authoritative(redirect.authoritative))
        .await
        .unwrap();
    assert!(!answer.redirect);
    assert!(answer.authoritative);

    cluster.close().await;
}

#[tokio::test]
async fn test_concurrent_lookups_agree_on_owner() {
    maybe_start_logging();

    let cluster = TestCluster::start(3, BrokerConfig::default()).await;
    let topic: TopicName = format!("persistent://{}/t", random_namespace()).parse().unwrap();

    let topic = &topic;
    let lookups = cluster
        .brokers
        .iter()
        .map(|b| async move { b.lookup().lookup(&lookup_request(topic)).await.unwrap() });
    let responses: Vec<LookupResponse> = futures::future::join_all(lookups).await;

    let owners: Vec<_> = responses.iter().map(|r| r.service_url.clone()).collect();
    assert!(owners.windows(2).all(|w| w[0] == w[1]), "{owners:?}");
    assert_eq!(responses.iter().filter(|r| !r.redirect).count(), 1);

    let owning = cluster
        .brokers
        .iter()
        .filter(|b| !b.ownership().owned_bundles().is_empty())
        .count();
    assert_eq!(owning, 1);

    cluster.close().await;
}

#[tokio::test]
async fn test_brokers_with_different_default_bundles_agree_on_owner() {
    maybe_start_logging();

    let store = Arc::new(MemoryMetadataStore::new());
    let log = Arc::new(MemoryEventLog::new());
    let a = broker_builder("a", &store, &log)
        .with_config(BrokerConfig::default().with_default_bundles(4))
        .build()
        .await
        .unwrap();
    let b = broker_builder("b", &store, &log)
        .with_config(BrokerConfig::default().with_default_bundles(2))
        .build()
        .await
        .unwrap();
    let topic: TopicName = "persistent://prop/ns-diff/t1".parse().unwrap();

    let from_a = a.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    let from_b = b.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    assert!(!from_a.redirect);
    assert!(from_b.redirect);
    assert_eq!(from_a.service_url, from_b.service_url);

    let bundle = a.bundles().bundle_for(&topic).await.unwrap();
    assert_eq!(b.bundles().bundle_for(&topic).await.unwrap(), bundle);
    assert_eq!(a.bundles().bundles(topic.namespace()).await.unwrap().bundles().len(), 4);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_create_namespace_keeps_layout_in_use() {
    maybe_start_logging();

    let cluster = TestCluster::start(2, BrokerConfig::default()).await;
    let (a, b) = (&cluster.brokers[0], &cluster.brokers[1]);
    let ns = random_namespace();
    let topic: TopicName = format!("persistent://{ns}/t1").parse().unwrap();

    a.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    let layout = b.create_namespace(&ns, 2).await.unwrap();
    assert_eq!(layout.bundles().len(), 4);

    let answer = b.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    assert!(answer.redirect);
    assert_eq!(
        answer.service_url.unwrap().as_str(),
        "pulsar://broker-0:6650"
    );
    assert!(b.ownership().owned_bundles().is_empty());

    cluster.close().await;
}

#[tokio::test]
async fn test_expired_owner_is_replaced() {
    maybe_start_logging();

    let cluster = TestCluster::start(2, BrokerConfig::default()).await;
    let (a, b) = (&cluster.brokers[0], &cluster.brokers[1]);
    let topic: TopicName = format!("persistent://{}/t", random_namespace()).parse().unwrap();

    a.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    assert!(b.lookup().lookup(&lookup_request(&topic)).await.unwrap().redirect);

    cluster.store.expire_session(a.session());

    let answer = b.lookup().lookup(&lookup_request(&topic)).await.unwrap();
    assert!(!answer.redirect);
    assert_eq!(
        answer.service_url.unwrap().as_str(),
        "pulsar://broker-1:6650"
    );
}

#[tokio::test]
async fn test_released_bundles_on_close() {
    maybe_start_logging();

    let cluster = TestCluster::start(2, BrokerConfig::default()).await;
    let topic: TopicName = format!("persistent://{}/t", random_namespace()).parse().unwrap();

    cluster.brokers[0]
        .lookup()
        .lookup(&lookup_request(&topic))
        .await
        .unwrap();
    cluster.brokers[0].close().await;

    let answer = cluster.brokers[1]
        .lookup()
        .lookup(&lookup_request(&topic))
        .await
        .unwrap();
    assert!(!answer.redirect);
}

#[tokio::test]
async fn test_web_lookup_listener_precedence() {
    maybe_start_logging();

    let cluster = TestCluster::start(1, BrokerConfig::default()).await;
    let broker = &cluster.brokers[0];
    let path = "/lookup/v2/topic/persistent/public/testns/testtopic";

    let body = |response: http::Response<String>| {
        assert_eq!(response.status(), StatusCode::OK, "{}", response.body());
        serde_json::from_str::<LookupResponse>(response.body()).unwrap()
    };

    // header only
    let request = Request::get(path)
        .header(LISTENER_NAME_HEADER, "internal")
        .body(())
        .unwrap();
    let found = body(broker.lookup().handle_web_request(&request).await);
    assert_eq!(
        found.service_url.unwrap().as_str(),
        "pulsar://broker-0.internal:6660"
    );

    // the query parameter supersedes the header
    let request = Request::get(format!("{path}?listenerName=internal"))
        .header(LISTENER_NAME_HEADER, "external")
        .body(())
        .unwrap();
    let found = body(broker.lookup().handle_web_request(&request).await);
    assert_eq!(
        found.http_url.unwrap().as_str(),
        "http://broker-0.internal:8090/"
    );

    // neither: the default listener
    let request = Request::get(path).body(()).unwrap();
    let found = body(broker.lookup().handle_web_request(&request).await);
    assert_eq!(found.service_url.unwrap().as_str(), "pulsar://broker-0:6650");

    // the external listener has no plaintext service URI
    let request = Request::get(format!("{path}?listenerName=external"))
        .body(())
        .unwrap();
    let response = broker.lookup().handle_web_request(&request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(error["code"], "NoListenerForProtocol");

    // ... but a TLS one
    let request = Request::get(format!("https://broker-0.example.com:8443{path}"))
        .header(LISTENER_NAME_HEADER, "external")
        .body(())
        .unwrap();
    let found = body(broker.lookup().handle_web_request(&request).await);
    assert_eq!(
        found.url_for(Protocol::PulsarSsl).unwrap().as_str(),
        "pulsar+ssl://broker-0.example.com:6651"
    );
    assert_eq!(found.service_url, None);

    cluster.close().await;
}

#[tokio::test]
async fn test_binary_lookup_command() {
    maybe_start_logging();

    let cluster = TestCluster::start(1, BrokerConfig::default()).await;
    let broker = &cluster.brokers[0];

    let command = Command::LookupTopic(CommandLookupTopic {
        request_id: 42,
        topic: "persistent://public/testns/testtopic".to_owned(),
        authoritative: false,
        advertised_listener_name: Some("external".to_owned()),
    });
    let connection = ConnectionContext {
        tls: true,
        ..Default::default()
    };

    let CommandResponse::LookupTopic(response) =
        broker.lookup().handle_command(&command, &connection).await;
    assert_eq!(response.request_id, 42);
    let found = response.result.unwrap();
    assert_eq!(
        found.service_url_tls.unwrap().as_str(),
        "pulsar+ssl://broker-0.example.com:6651"
    );

    // plaintext connections need a plaintext URI on the chosen listener
    let CommandResponse::LookupTopic(response) = broker
        .lookup()
        .handle_command(&command, &ConnectionContext::default())
        .await;
    assert_matches!(
        response.result,
        Err(LookupError::NoListenerForProtocol { .. })
    );

    cluster.close().await;
}

/// Rejects lookups of topics whose local name starts with `denied`, and counts its invocations.
#[derive(Debug, Default)]
struct CountingInterceptor {
    initialized: AtomicUsize,
    commands: AtomicUsize,
    web_requests: AtomicUsize,
    closed: AtomicUsize,
}

impl BrokerInterceptor for CountingInterceptor {
    fn initialize(&self, context: &BrokerContext) -> Result<(), InterceptError> {
        assert_eq!(context.broker_id, "intercepted");
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_command(
        &self,
        command: &Command,
        _connection: &ConnectionContext,
    ) -> Result<(), InterceptError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let Command::LookupTopic(lookup) = command;
        if lookup.topic.contains("/denied") {
            Err(InterceptError::Rejected("topic is denied".to_owned()))
        } else {
            Err(InterceptError::Failed("metrics sink offline".to_owned()))
        }
    }

    fn on_web_request(&self, request: &http::Request<()>) -> Result<(), InterceptError> {
        self.web_requests.fetch_add(1, Ordering::SeqCst);
        if request.uri().path().contains("/denied") {
            Err(InterceptError::Rejected("topic is denied".to_owned()))
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_interceptor() {
    maybe_start_logging();

    let cluster = TestCluster::start(0, BrokerConfig::default()).await;
    let interceptor = Arc::new(CountingInterceptor::default());
    let broker = broker_builder("intercepted", &cluster.store, &cluster.log)
        .with_interceptor(Arc::clone(&interceptor) as Arc<dyn BrokerInterceptor>)
        .build()
        .await
        .unwrap();
    assert_eq!(interceptor.initialized.load(Ordering::SeqCst), 1);

    let lookup = |topic: &str| {
        Command::LookupTopic(CommandLookupTopic {
            request_id: 1,
            topic: topic.to_owned(),
            authoritative: false,
            advertised_listener_name: None,
        })
    };
    let connection = ConnectionContext::default();

    // a failing interceptor does not stop the lookup
    let CommandResponse::LookupTopic(response) = broker
        .lookup()
        .handle_command(&lookup("persistent://public/default/allowed"), &connection)
        .await;
    assert!(response.result.is_ok());

    let CommandResponse::LookupTopic(response) = broker
        .lookup()
        .handle_command(&lookup("persistent://public/default/denied"), &connection)
        .await;
    assert_matches!(response.result, Err(LookupError::Rejected(_)));
    assert_eq!(interceptor.commands.load(Ordering::SeqCst), 2);

    let request = Request::get("/lookup/v2/topic/persistent/public/default/denied")
        .body(())
        .unwrap();
    let response = broker.lookup().handle_web_request(&request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(interceptor.web_requests.load(Ordering::SeqCst), 1);

    broker.close().await;
    assert_eq!(interceptor.closed.load(Ordering::SeqCst), 1);
}

#[derive(Debug)]
struct RefusingInterceptor;

impl BrokerInterceptor for RefusingInterceptor {
    fn initialize(&self, _context: &BrokerContext) -> Result<(), InterceptError> {
        Err(InterceptError::Rejected("not today".to_owned()))
    }

    fn on_command(&self, _: &Command, _: &ConnectionContext) -> Result<(), InterceptError> {
        Ok(())
    }

    fn on_web_request(&self, _: &http::Request<()>) -> Result<(), InterceptError> {
        Ok(())
    }

    fn close(&self) {}
}

#[tokio::test]
async fn test_interceptor_can_refuse_start() {
    let cluster = TestCluster::start(0, BrokerConfig::default()).await;
    let result = broker_builder("refused", &cluster.store, &cluster.log)
        .with_interceptor(Arc::new(RefusingInterceptor))
        .build()
        .await;
    assert_matches!(
        result,
        Err(pulsar_control::Error::Interceptor(InterceptError::Rejected(_)))
    );
}
