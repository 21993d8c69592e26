use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    analysis::{AnalysisBackend, OllamaClient},
    config::AppConfig,
    scanner::{NmapExecutor, ScanExecutor},
    session::{ServerMessage, Session, SessionState},
};

const SESSION_CHANNEL_CAPACITY: usize = 8;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Backends shared read-only by every session.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<dyn ScanExecutor>,
    analyzer: Arc<dyn AnalysisBackend>,
    model: String,
}

impl AppState {
    pub fn new(
        executor: Arc<dyn ScanExecutor>,
        analyzer: Arc<dyn AnalysisBackend>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            analyzer,
            model: model.into(),
        }
    }

    /// nmap + Ollama backends from the runtime configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let ollama = OllamaClient::new(&config.ollama_url, &config.model, config.analysis_timeout)?;
        Ok(Self::new(
            Arc::new(NmapExecutor::new(&config.nmap_bin)),
            Arc::new(ollama),
            &config.model,
        ))
    }

    pub fn executor(&self) -> Arc<dyn ScanExecutor> {
        self.executor.clone()
    }

    pub fn analyzer(&self) -> Arc<dyn AnalysisBackend> {
        self.analyzer.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub model: String,
}

pub fn router(state: AppState, ui_dir: &Path) -> Router {
    let static_svc = ServeDir::new(ui_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/api/health", get(get_health))
        .route("/ws/scan", get(ws_scan))
        .with_state(state)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(config: &AppConfig) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state, &config.ui_dir);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %config.bind, ui_dir = %config.ui_dir.display(), model = %config.model, "serving dashboard");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_health(State(app): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(Health {
            status: "ok",
            model: app.model.clone(),
        }),
    )
}

async fn ws_scan(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    let id = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| handle_socket(socket, app).instrument(info_span!("session", id)))
}

/// The client end of a session: where messages go, and how a disconnect shows.
#[async_trait]
pub trait ClientLink: Send {
    async fn send(&mut self, msg: &ServerMessage) -> Result<()>;

    /// Resolves once the client has gone away. Other inbound frames are
    /// ignored. Must be cancel-safe.
    async fn closed(&mut self);
}

#[async_trait]
impl ClientLink for WebSocket {
    async fn send(&mut self, msg: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        WebSocket::send(self, Message::Text(text.into()))
            .await
            .context("websocket send failed")
    }

    async fn closed(&mut self) {
        loop {
            match self.recv().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    }
}

/// How a bridged session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The session ran to its own end state.
    Finished(SessionState),
    /// The client left; the session was cancelled.
    Disconnected,
    /// The session task panicked.
    Crashed,
}

async fn handle_socket(mut socket: WebSocket, app: AppState) {
    let raw_config = match next_text(&mut socket).await {
        Some(text) => text,
        None => {
            debug!("client closed before sending configuration");
            return;
        }
    };

    let outcome = bridge(&mut socket, app.executor(), app.analyzer(), raw_config).await;
    debug!(?outcome, "session bridge finished");
    let _ = WebSocket::send(&mut socket, Message::Close(None)).await;
}

/// Run one session in its own task and relay its messages to `link` until a
/// terminal one is sent or the client goes away.
pub async fn bridge<L: ClientLink>(
    link: &mut L,
    executor: Arc<dyn ScanExecutor>,
    analyzer: Arc<dyn AnalysisBackend>,
    raw_config: String,
) -> BridgeOutcome {
    let (tx, mut rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let session = Session::new(executor, analyzer, tx);

    let task_cancel = cancel.clone();
    let task = tokio::spawn(
        async move {
            // Dropping the session future kills an in-flight nmap child.
            tokio::select! {
                _ = task_cancel.cancelled() => None,
                state = session.run(&raw_config) => Some(state),
            }
        }
        .in_current_span(),
    );

    let mut delivered_terminal = false;
    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(msg) => {
                    let terminal = msg.is_terminal();
                    if link.send(&msg).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                    if terminal {
                        delivered_terminal = true;
                        break;
                    }
                }
                None => break,
            },
            _ = link.closed() => {
                info!("client disconnected mid-session");
                cancel.cancel();
                break;
            }
        }
    }

    match task.await {
        Ok(Some(state)) => BridgeOutcome::Finished(state),
        Ok(None) => BridgeOutcome::Disconnected,
        Err(e) => {
            error!(error = %e, "session task failed");
            if !delivered_terminal && !cancel.is_cancelled() {
                let msg = ServerMessage::Error {
                    message: format!("internal error: {e}"),
                };
                let _ = link.send(&msg).await;
            }
            BridgeOutcome::Crashed
        }
    }
}

/// First text frame from the client; binary frames are read as UTF-8.
async fn next_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(msg) = socket.recv().await {
        match msg.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Binary(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}
