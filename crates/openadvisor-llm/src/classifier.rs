//! Query classifier
//!
//! Pure, deterministic mapping from request text + conversation depth
//! + flags to a query category and preferred provider. No I/O; the
//! whole pass is a handful of substring scans.
//!
//! Priority when several categories match: market_data >
//! document_analysis (attachment present) > simple > complex, with
//! ties between simple and complex signals broken toward complex -
//! an ambiguous but consequential query should not be under-served.

use openadvisor_types::{
    Classification, GenerateRequest, ProviderKind, QueryType, Tier,
};

use crate::router::fallback_order;

/// Keyword dictionaries driving classification. Kept as data so edge
/// cases stay easy to cover in tests.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub market_terms: Vec<&'static str>,
    pub simple_openers: Vec<&'static str>,
    pub complex_terms: Vec<&'static str>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            market_terms: vec![
                "price",
                "quote",
                "stock",
                "ticker",
                "market",
                "markets",
                "trading at",
                "s&p",
                "nasdaq",
                "dow jones",
                "etf",
                "crypto",
                "bitcoin",
                "exchange rate",
                "interest rate",
                "bond yield",
                "earnings report",
            ],
            simple_openers: vec![
                "what is",
                "what's",
                "who is",
                "when",
                "define",
                "meaning of",
                "hi",
                "hello",
                "thanks",
                "thank you",
            ],
            complex_terms: vec![
                "analyze",
                "analysis",
                "compare",
                "portfolio",
                "strategy",
                "allocation",
                "retirement",
                "projection",
                "forecast",
                "scenario",
                "diversif",
                "rebalance",
                "risk",
                "tax",
                "evaluate",
                "pros and cons",
                "trade-off",
            ],
        }
    }
}

/// Preferred provider for a category
pub fn preferred_provider(query_type: QueryType) -> ProviderKind {
    match query_type {
        QueryType::MarketData => ProviderKind::Perplexity,
        QueryType::DocumentAnalysis => ProviderKind::OpenAi,
        QueryType::Complex => ProviderKind::Anthropic,
        QueryType::Simple | QueryType::SpeedCritical => ProviderKind::Groq,
    }
}

/// Rough per-call cost estimate in USD for one provider. Estimates
/// feed analytics, never admission control.
pub fn estimated_cost(provider: ProviderKind, request: &GenerateRequest) -> f64 {
    // blended $/1K tokens, order-of-magnitude only
    let per_1k = match provider {
        ProviderKind::Anthropic => 0.009,
        ProviderKind::OpenAi => 0.0075,
        ProviderKind::Gemini => 0.002,
        ProviderKind::Groq => 0.0008,
        ProviderKind::Perplexity => 0.003,
        ProviderKind::DeepSeek => 0.0005,
    };
    let tokens = request.estimated_prompt_tokens() + request.max_tokens.unwrap_or(1024);
    f64::from(tokens) / 1000.0 * per_1k
}

/// Classify a request. Pure and deterministic; overrides (forced
/// provider, tier, recent failures) are applied by
/// [`apply_overrides`].
pub fn classify(request: &GenerateRequest, rules: &RuleSet) -> Classification {
    let text = request.message.to_lowercase();
    let word_count = text.split_whitespace().count();
    let sentence_count = text
        .split(['.', '?', '!'])
        .filter(|s| !s.trim().is_empty())
        .count();
    let depth = request.history.len();

    let market_hit = rules.market_terms.iter().any(|term| text.contains(term));
    let complex_hit = rules.complex_terms.iter().any(|term| text.contains(term));
    let opener_hit = rules
        .simple_openers
        .iter()
        .any(|term| text.starts_with(term));
    let complex_surface = word_count > 20 || sentence_count > 2 || depth > 5;

    let (query_type, confidence) = if market_hit {
        (QueryType::MarketData, 0.9)
    } else if request.has_attachment {
        (QueryType::DocumentAnalysis, 0.85)
    } else if request.speed_critical {
        (QueryType::SpeedCritical, 0.9)
    } else if complex_hit {
        // even a short query with complex terms resolves complex
        (QueryType::Complex, 0.85)
    } else if word_count <= 15 && opener_hit {
        (QueryType::Simple, 0.8)
    } else if complex_surface {
        (QueryType::Complex, 0.7)
    } else if word_count <= 15 {
        (QueryType::Simple, 0.6)
    } else {
        // 16-20 words, no signals either way: analytical default
        (QueryType::Complex, 0.5)
    };

    let provider = preferred_provider(query_type);
    Classification {
        query_type,
        provider,
        confidence,
        estimated_cost: estimated_cost(provider, request),
    }
}

/// Apply caller policy on top of a raw classification, in order:
/// a forced provider always wins; a free-tier caller is downgraded to
/// the cheapest provider unless the category is market_data; a
/// provider with a recent recorded error for this conversation is
/// excluded.
pub fn apply_overrides(
    mut classification: Classification,
    request: &GenerateRequest,
) -> Classification {
    if let Some(forced) = request.force_provider {
        classification.provider = forced;
        classification.confidence = 1.0;
        classification.estimated_cost = estimated_cost(forced, request);
        return classification;
    }

    if request.tier == Tier::Free && classification.query_type != QueryType::MarketData {
        classification.provider = ProviderKind::DeepSeek;
    }

    if request.recent_failures.contains(&classification.provider) {
        let replacement = fallback_order(classification.query_type)
            .iter()
            .copied()
            .find(|kind| !request.recent_failures.contains(kind));
        if let Some(kind) = replacement {
            classification.provider = kind;
        }
    }

    classification.estimated_cost = estimated_cost(classification.provider, request);
    classification
}
