//! HTTP surface for the orchestrator (SPEC_FULL.md §1.1): `POST /research`
//! starts a run and streams progress as Server-Sent Events, `GET /healthz`
//! reports liveness. Mirrors the teacher's `main.rs` shape — a single axum
//! `Router` built from shared `AppState`, `CorsLayer::permissive()` +
//! `TraceLayer::new_for_http()`, graceful shutdown on SIGINT/SIGTERM.
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use meridian_research::config::load_research_config;
use meridian_research::types::{ProgressEvent, ProgressEventType};
use meridian_research::{AppState, ChannelSink, Orchestrator, PlanningHints, ProgressUpdater};

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    query: String,
    #[serde(default)]
    max_depth: Option<u32>,
    #[serde(default)]
    objectives: Vec<String>,
    #[serde(default)]
    deliverables: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = load_research_config();
    info!(
        max_depth = config.max_depth,
        timeout_ms = config.timeout.as_millis() as u64,
        reasoning_model = %config.reasoning_model,
        "loaded research config"
    );

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let state = Arc::new(AppState::new(http_client, config));

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/research", post(research_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!("Address already in use: {bind_addr}. Stop the existing process or set PORT to a free one.")
        }
        Err(e) => return Err(e.into()),
    };
    info!("meridian-research listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "meridian-research",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start a research run and stream its progress events as SSE. Per spec.md
/// §6, `complete` (or `error`, on a failed run) is always the last event in
/// the progress stream; the full `ResearchResult` follows as one additional
/// `result` frame so a caller gets both the live progress and the final
/// payload over a single connection without violating that invariant.
async fn research_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResearchRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx));
    let progress = Arc::new(ProgressUpdater::new(Some(sink)));
    let cancel = CancellationToken::new();

    let mut run_config = (*state.config).clone();
    if let Some(depth) = req.max_depth {
        run_config.max_depth = depth.max(1);
    }

    let orchestrator = Orchestrator::new(
        state.search.clone(),
        state.scraper.clone(),
        state.embedder.clone(),
        state.llm_client(),
        Arc::new(run_config),
        progress,
    );

    let hints = PlanningHints {
        objectives: req.objectives,
        deliverables: req.deliverables,
    };

    let (result_tx, result_rx) = tokio::sync::oneshot::channel();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let result = orchestrator.run(req.query, hints, run_cancel).await;
        let _ = result_tx.send(result);
    });

    let progress_stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));

    let result_stream = stream::once(async move {
        let event = match result_rx.await {
            Ok(result) => Event::default()
                .event("result")
                .json_data(&result)
                .unwrap_or_else(|_| Event::default().event("result").data("{}")),
            Err(_) => Event::default().event("result").data("{}"),
        };
        Ok(event)
    });

    Sse::new(progress_stream.chain(result_stream)).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(progress_event_type_name(event.event_type))
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("error").data("{}"))
}

fn progress_event_type_name(event_type: ProgressEventType) -> String {
    serde_json::to_value(event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "activity".to_string())
}
