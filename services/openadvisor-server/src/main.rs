//! OpenAdvisor Server - the gateway's HTTP surface
//!
//! One endpoint matters: `POST /api/generate` accepts a generate
//! request and answers with SSE-style frames (`data: <json>\n\n`).
//! The first frame is always the `model_indicator` metadata frame,
//! content frames follow in provider emission order, and the stream
//! is terminated by a frame whose payload is the literal `[DONE]`.
//!
//! # Quick Start
//!
//! ```bash
//! # At least one provider credential must be set
//! GROQ_API_KEY=gsk-... openadvisor-server
//!
//! # Custom port and host
//! openadvisor-server --port 9090 --host 0.0.0.0
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router as AxumRouter,
};
use clap::Parser;
use futures::StreamExt;
use openadvisor_llm::{QuotaState, Router};
use openadvisor_types::{GatewayError, GenerateRequest, ProviderKind, StreamEvent};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenAdvisor Server - provider routing gateway
#[derive(Parser, Debug)]
#[command(
    name = "openadvisor-server",
    about = "OpenAdvisor - LLM provider routing gateway",
    version
)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "OPENADVISOR_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "OPENADVISOR_PORT")]
    port: u16,
}

struct AppState {
    router: Router,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let router = match Router::from_env() {
        Ok(router) => router,
        Err(e) => {
            tracing::error!("Failed to configure gateway: {}", e);
            std::process::exit(1);
        }
    };
    let state = Arc::new(AppState { router });

    let app = AxumRouter::new()
        .route("/health", get(health))
        .route("/api/providers", get(providers))
        .route("/api/generate", post(generate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("OpenAdvisor server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct ProviderStatusRow {
    provider: ProviderKind,
    #[serde(flatten)]
    state: QuotaState,
}

/// Operator surface: per-provider quota and circuit snapshot
async fn providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatusRow>> {
    let rows = state
        .router
        .provider_status()
        .into_iter()
        .map(|(provider, state)| ProviderStatusRow { provider, state })
        .collect();
    Json(rows)
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    match state.router.dispatch(request).await {
        Ok(stream) => {
            let frames = stream.map(|event| -> Result<Event, Infallible> {
                Ok(match &event {
                    StreamEvent::Done { .. } => Event::default().data("[DONE]"),
                    other => {
                        let payload = serde_json::to_string(other).unwrap_or_default();
                        Event::default().data(payload)
                    }
                })
            });
            Sse::new(frames)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    retryable: bool,
}

/// Dispatch failed before any content byte: answer with a status
/// code instead of a broken stream. Configuration detail stays in
/// the logs, never in the body.
fn error_response(err: GatewayError) -> Response {
    let (status, retryable) = match &err {
        GatewayError::AllProvidersExhausted => (StatusCode::SERVICE_UNAVAILABLE, true),
        GatewayError::Configuration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, false),
        _ => (StatusCode::BAD_GATEWAY, true),
    };
    tracing::error!(error = %err, "dispatch failed");
    (
        status,
        Json(ErrorBody {
            error: err.user_message(),
            retryable,
        }),
    )
        .into_response()
}
