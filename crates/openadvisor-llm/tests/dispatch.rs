//! End-to-end dispatch tests over mock provider clients

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use openadvisor_llm::{
    AnalyticsSink, DispatchRecord, ManualClock, ProviderClient, ProviderStream, QuotaSnapshot,
    QuotaStore, Router, WireFamily,
};
use openadvisor_types::{
    GatewayError, GenerateRequest, Message, ProviderKind, QueryType, StreamEvent,
};

#[derive(Clone, Copy)]
enum Behavior {
    /// Serve a canned delta-object stream
    Serve,
    /// Fail with HTTP 503 before any bytes
    ServerError,
    /// Fail with provider-reported 429
    RateLimited,
}

struct MockProvider {
    kind: ProviderKind,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    fn new(kind: ProviderKind, behavior: Behavior) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self {
            kind,
            behavior,
            calls: calls.clone(),
        });
        (provider, calls)
    }

    fn canned_chunks(&self) -> Vec<openadvisor_types::Result<Bytes>> {
        vec![
            Ok(Bytes::from(format!(
                "data: {{\"choices\":[{{\"delta\":{{\"content\":\"served by {}\"}}}}]}}\n",
                self.kind
            ))),
            Ok(Bytes::from("data: [DONE]\n")),
        ]
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn wire_family(&self) -> WireFamily {
        WireFamily::DeltaObject
    }

    async fn open_stream(
        &self,
        _request: &GenerateRequest,
    ) -> openadvisor_types::Result<ProviderStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Serve => Ok(ProviderStream {
                quota: QuotaSnapshot::default(),
                bytes: futures::stream::iter(self.canned_chunks()).boxed(),
            }),
            Behavior::ServerError => Err(GatewayError::ProviderServer {
                provider: self.kind,
                status: 503,
                message: "upstream overloaded".to_string(),
            }),
            Behavior::RateLimited => Err(GatewayError::QuotaExceeded {
                provider: self.kind,
                reason: "provider returned 429".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<DispatchRecord>>,
}

impl AnalyticsSink for CollectingSink {
    fn record(&self, record: DispatchRecord) {
        self.records.lock().unwrap().push(record);
    }
}

struct Harness {
    router: Router,
    store: Arc<QuotaStore>,
    sink: Arc<CollectingSink>,
}

fn harness(providers: Vec<Arc<MockProvider>>) -> Harness {
    let store = Arc::new(QuotaStore::new(Arc::new(ManualClock::default())));
    let sink = Arc::new(CollectingSink::default());
    let clients: Vec<Arc<dyn ProviderClient>> = providers
        .into_iter()
        .map(|p| p as Arc<dyn ProviderClient>)
        .collect();
    let router = Router::new(clients, store.clone(), sink.clone());
    Harness {
        router,
        store,
        sink,
    }
}

async fn collect(stream: openadvisor_llm::CanonicalStream) -> Vec<StreamEvent> {
    stream.collect().await
}

fn served_by(events: &[StreamEvent]) -> ProviderKind {
    match &events[0] {
        StreamEvent::ModelIndicator { provider, .. } => *provider,
        other => panic!("first event must be the metadata frame, got {other:?}"),
    }
}

fn trip_circuit(store: &QuotaStore, kind: ProviderKind) {
    store.update(kind, |state| {
        state.consecutive_failures = 3;
        state.circuit = openadvisor_llm::CircuitState::Open;
        state.circuit_opened_at = Some(store.now());
    });
}

#[tokio::test]
async fn test_market_data_goes_to_realtime_provider() {
    let (perplexity, _) = MockProvider::new(ProviderKind::Perplexity, Behavior::Serve);
    let (anthropic, anthropic_calls) = MockProvider::new(ProviderKind::Anthropic, Behavior::Serve);
    let h = harness(vec![perplexity, anthropic]);

    // deep conversation must not pull market data toward the
    // offline-reasoning provider
    let history: Vec<_> = (0..10).map(|i| Message::user(format!("turn {i}"))).collect();
    let request = GenerateRequest::new("what is the nasdaq trading at").with_history(history);

    let events = collect(h.router.dispatch(request).await.unwrap()).await;
    assert_eq!(served_by(&events), ProviderKind::Perplexity);
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_shape_head_deltas_done() {
    let (groq, _) = MockProvider::new(ProviderKind::Groq, Behavior::Serve);
    let h = harness(vec![groq]);

    let events = collect(
        h.router
            .dispatch(GenerateRequest::new("what is an index fund"))
            .await
            .unwrap(),
    )
    .await;

    assert!(matches!(events[0], StreamEvent::ModelIndicator { .. }));
    assert!(matches!(events[1], StreamEvent::Delta { .. }));
    assert!(events.last().unwrap().is_done());
}

#[tokio::test]
async fn test_server_error_falls_back_and_attributes_fallback_provider() {
    let (anthropic, anthropic_calls) =
        MockProvider::new(ProviderKind::Anthropic, Behavior::ServerError);
    let (gemini, gemini_calls) = MockProvider::new(ProviderKind::Gemini, Behavior::Serve);
    let h = harness(vec![anthropic, gemini]);

    let request = GenerateRequest::new("analyze my portfolio allocation in detail");
    let events = collect(h.router.dispatch(request).await.unwrap()).await;

    assert_eq!(served_by(&events), ProviderKind::Gemini);
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gemini_calls.load(Ordering::SeqCst), 1);

    // the 5xx counted toward the primary's circuit tally
    let state = h.store.snapshot(ProviderKind::Anthropic);
    assert_eq!(state.consecutive_failures, 1);

    let records = h.sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, ProviderKind::Gemini);
    assert!(records[0].was_fallback);
    assert!(records[0].fallback_reason.is_some());
    assert_eq!(records[0].query_type, QueryType::Complex);
}

#[tokio::test]
async fn test_quota_rejected_primary_skipped_without_network_call() {
    let (anthropic, anthropic_calls) = MockProvider::new(ProviderKind::Anthropic, Behavior::Serve);
    let (gemini, _) = MockProvider::new(ProviderKind::Gemini, Behavior::Serve);
    let h = harness(vec![anthropic, gemini]);

    h.store.update(ProviderKind::Anthropic, |state| {
        state.tokens_remaining = 0;
    });

    let request = GenerateRequest::new(
        "evaluate my asset allocation and propose a rebalancing approach for the long term",
    );
    let classification = h.router.classify_request(&request);
    assert_eq!(classification.query_type, QueryType::Complex);

    let events = collect(h.router.dispatch(request).await.unwrap()).await;
    assert_eq!(served_by(&events), ProviderKind::Gemini);
    // the limiter rejected before any network call was attempted
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 0);

    let records = h.sink.records.lock().unwrap();
    assert!(records[0].was_fallback);
    assert!(records[0]
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("Quota exhausted"));
}

#[tokio::test]
async fn test_all_circuits_open_exhausts_with_zero_calls() {
    let (anthropic, anthropic_calls) = MockProvider::new(ProviderKind::Anthropic, Behavior::Serve);
    let (gemini, gemini_calls) = MockProvider::new(ProviderKind::Gemini, Behavior::Serve);
    let h = harness(vec![anthropic, gemini]);

    trip_circuit(&h.store, ProviderKind::Anthropic);
    trip_circuit(&h.store, ProviderKind::Gemini);

    let request = GenerateRequest::new("analyze my retirement strategy thoroughly");
    let err = h.router.dispatch(request).await.err().unwrap();
    assert!(matches!(err, GatewayError::AllProvidersExhausted));
    assert_eq!(anthropic_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gemini_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limited_provider_falls_back_without_tripping_circuit() {
    let (groq, _) = MockProvider::new(ProviderKind::Groq, Behavior::RateLimited);
    let (gemini, _) = MockProvider::new(ProviderKind::Gemini, Behavior::Serve);
    let h = harness(vec![groq, gemini]);

    let events = collect(
        h.router
            .dispatch(GenerateRequest::new("what is a dividend"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(served_by(&events), ProviderKind::Gemini);

    let state = h.store.snapshot(ProviderKind::Groq);
    assert_eq!(state.circuit, openadvisor_llm::CircuitState::Closed);
    // 429 emptied the request budget instead
    assert_eq!(state.requests_remaining, 0);
}

#[tokio::test]
async fn test_forced_unconfigured_provider_is_configuration_error() {
    let (groq, _) = MockProvider::new(ProviderKind::Groq, Behavior::Serve);
    let h = harness(vec![groq]);

    let request =
        GenerateRequest::new("hello").with_forced_provider(ProviderKind::OpenAi);
    let err = h.router.dispatch(request).await.err().unwrap();
    assert!(matches!(err, GatewayError::Configuration { .. }));
}

#[tokio::test]
async fn test_success_resets_failure_tally() {
    let (anthropic, _) = MockProvider::new(ProviderKind::Anthropic, Behavior::Serve);
    let h = harness(vec![anthropic]);

    h.store.update(ProviderKind::Anthropic, |state| {
        state.consecutive_failures = 2;
    });

    let request = GenerateRequest::new("evaluate this rebalancing strategy for tax impact");
    let _ = collect(h.router.dispatch(request).await.unwrap()).await;

    let state = h.store.snapshot(ProviderKind::Anthropic);
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.requests_remaining < state.requests_limit);
}
