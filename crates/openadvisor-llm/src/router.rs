//! Router - classify, admit, call, fall back
//!
//! Dispatch walks the category's fallback chain strictly in order:
//! admission rejections and pre-stream call failures advance to the
//! next candidate; once a provider stream is open the decision is
//! final and streaming continues independently - partial output is
//! never discarded and re-served from a different provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::StreamExt;
use openadvisor_types::{
    Classification, GatewayError, GenerateRequest, ProviderKind, QueryType, Result, StreamEvent,
};
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsSink, DispatchRecord, TracingSink};
use crate::classifier::{apply_overrides, classify, estimated_cost, RuleSet};
use crate::clock::SystemClock;
use crate::config::GatewayConfig;
use crate::limiter::{AdaptiveLimiter, CallUsage};
use crate::providers::{
    AnthropicClient, DeepSeekClient, GeminiClient, GroqClient, OpenAiClient, PerplexityClient,
    ProviderClient,
};
use crate::quota::{QuotaState, QuotaStore};
use crate::transcode::transcode;

/// The normalized stream handed back to callers
pub type CanonicalStream = BoxStream<'static, StreamEvent>;

/// Fixed per-category fallback ordering
pub fn fallback_order(query_type: QueryType) -> &'static [ProviderKind] {
    match query_type {
        QueryType::MarketData => &[ProviderKind::Perplexity, ProviderKind::Gemini],
        QueryType::DocumentAnalysis => &[ProviderKind::OpenAi, ProviderKind::Gemini],
        QueryType::Complex => &[ProviderKind::Anthropic, ProviderKind::Gemini],
        QueryType::Simple | QueryType::SpeedCritical => &[
            ProviderKind::Groq,
            ProviderKind::Gemini,
            ProviderKind::Anthropic,
        ],
    }
}

/// Ordered candidate list for one dispatch. The primary never
/// repeats later in its own chain.
pub fn fallback_chain(primary: ProviderKind, query_type: QueryType) -> Vec<ProviderKind> {
    let mut chain = vec![primary];
    for kind in fallback_order(query_type) {
        if !chain.contains(kind) {
            chain.push(*kind);
        }
    }
    chain
}

/// The integration point: classifier + limiter + provider clients +
/// transcoder behind one `dispatch` call
pub struct Router {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    limiter: AdaptiveLimiter,
    rules: RuleSet,
    analytics: Arc<dyn AnalyticsSink>,
}

impl Router {
    pub fn new(
        clients: Vec<Arc<dyn ProviderClient>>,
        store: Arc<QuotaStore>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.kind(), client))
            .collect();
        Self {
            clients,
            limiter: AdaptiveLimiter::new(store),
            rules: RuleSet::default(),
            analytics,
        }
    }

    /// Build a router from environment configuration. Providers
    /// without credentials are left out; at least one must exist.
    pub fn from_env() -> Result<Self> {
        let config = GatewayConfig::from_env();
        if config.is_empty() {
            return Err(GatewayError::Configuration {
                message: "no provider credentials configured".to_string(),
            });
        }

        let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();
        for kind in config.configured().collect::<Vec<_>>() {
            let settings = config
                .settings(kind)
                .cloned()
                .ok_or_else(|| GatewayError::Configuration {
                    message: format!("settings missing for {kind}"),
                })?;
            let client: Arc<dyn ProviderClient> = match kind {
                ProviderKind::Anthropic => Arc::new(AnthropicClient::new(settings)?),
                ProviderKind::OpenAi => Arc::new(OpenAiClient::new(settings)?),
                ProviderKind::Gemini => Arc::new(GeminiClient::new(settings)?),
                ProviderKind::Groq => Arc::new(GroqClient::new(settings)?),
                ProviderKind::Perplexity => Arc::new(PerplexityClient::new(settings)?),
                ProviderKind::DeepSeek => Arc::new(DeepSeekClient::new(settings)?),
            };
            clients.push(client);
        }
        info!(
            providers = clients.len(),
            "gateway configured"
        );

        let store = Arc::new(QuotaStore::new(Arc::new(SystemClock)));
        Ok(Self::new(clients, store, Arc::new(TracingSink)))
    }

    pub fn store(&self) -> &Arc<QuotaStore> {
        self.limiter.store()
    }

    /// Per-provider quota/circuit snapshot for status surfaces
    pub fn provider_status(&self) -> Vec<(ProviderKind, QuotaState)> {
        let mut status: Vec<_> = self
            .clients
            .keys()
            .map(|kind| (*kind, self.store().snapshot(*kind)))
            .collect();
        status.sort_by_key(|(kind, _)| kind.as_str());
        status
    }

    /// Classify the request with caller policy applied
    pub fn classify_request(&self, request: &GenerateRequest) -> Classification {
        apply_overrides(classify(request, &self.rules), request)
    }

    /// Dispatch one request: returns the canonical stream, starting
    /// with a metadata event naming the provider that actually
    /// serves it.
    pub async fn dispatch(&self, request: GenerateRequest) -> Result<CanonicalStream> {
        let classification = self.classify_request(&request);
        debug!(
            query_type = %classification.query_type,
            provider = %classification.provider,
            confidence = f64::from(classification.confidence),
            "request classified"
        );

        // a forced provider that is not configured is fatal, not a
        // fallback case
        if let Some(forced) = request.force_provider {
            if !self.clients.contains_key(&forced) {
                return Err(GatewayError::Configuration {
                    message: format!("forced provider {forced} is not configured"),
                });
            }
        }

        let chain = fallback_chain(classification.provider, classification.query_type);
        let dispatch_started = Instant::now();
        let mut last_reason: Option<String> = None;

        for (attempt, kind) in chain.iter().copied().enumerate() {
            let Some(client) = self.clients.get(&kind) else {
                debug!(provider = %kind, "provider not configured, skipping");
                continue;
            };

            if let Err(rejection) = self.limiter.admit(kind).await {
                info!(provider = %kind, reason = %rejection, "admission rejected, advancing");
                last_reason = Some(rejection.to_string());
                continue;
            }

            let call_started = Instant::now();
            match client.open_stream(&request).await {
                Ok(provider_stream) => {
                    let latency_ms = call_started.elapsed().as_millis() as u64;
                    let usage = CallUsage {
                        estimated_tokens: request.estimated_prompt_tokens()
                            + request.max_tokens.unwrap_or(1024),
                        reasoning_tokens: 0,
                        estimated_cost: estimated_cost(kind, &request),
                    };
                    self.limiter
                        .record_success(kind, latency_ms, &provider_stream.quota, &usage);

                    self.analytics.record(DispatchRecord {
                        request_id: uuid::Uuid::new_v4().to_string(),
                        provider: kind,
                        model: client.model().to_string(),
                        was_fallback: attempt > 0,
                        fallback_reason: if attempt > 0 { last_reason.clone() } else { None },
                        query_type: classification.query_type,
                        latency_ms: dispatch_started.elapsed().as_millis() as u64,
                        estimated_prompt_tokens: request.estimated_prompt_tokens(),
                        timestamp: self.store().now(),
                    });

                    let head = StreamEvent::ModelIndicator {
                        provider: kind,
                        model: client.model().to_string(),
                        model_name: kind.display_name().to_string(),
                        query_type: classification.query_type,
                    };
                    let body = transcode(provider_stream.bytes, client.wire_family());
                    return Ok(futures::stream::iter([head]).chain(body).boxed());
                }
                Err(err) => {
                    if !err.triggers_fallback() {
                        // configuration failures surface immediately
                        return Err(err);
                    }
                    if err.counts_toward_circuit() {
                        self.limiter.record_failure(kind);
                    } else if matches!(err, GatewayError::QuotaExceeded { .. }) {
                        self.limiter.record_rate_limited(kind);
                    }
                    warn!(provider = %kind, error = %err, "provider call failed, advancing");
                    last_reason = Some(err.to_string());
                }
            }
        }

        warn!(
            reason = last_reason.as_deref().unwrap_or("no candidate configured"),
            "fallback chain exhausted"
        );
        Err(GatewayError::AllProvidersExhausted)
    }
}
