//! One scan-and-analyze cycle for a single client.
//!
//! `AwaitingConfig -> Scanning -> Parsing -> RequestingAnalysis -> Complete`,
//! with `Error` reachable from every state. Each step is awaited before the
//! next starts; progress goes out on an mpsc channel that the transport
//! drains. A closed channel means the client left, and the session stops
//! without reporting anything.
use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::analysis::AnalysisBackend;
use crate::encoder;
use crate::error::DashboardError;
use crate::normalize;
use crate::scanner::ScanExecutor;
use crate::types::{Profile, ScanMeta, ScanOptions, SessionResult, TOOL_NAME};

pub const MISSING_TARGET: &str = "Missing scan target.";
pub const OPTION_LIKE_TARGET: &str = "Invalid scan target: must not start with '-'.";

/// Configuration message sent by the client to start a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub no_ping: Option<bool>,
    #[serde(default)]
    pub os_detect: Option<bool>,
    #[serde(default)]
    pub vuln_scripts: Option<bool>,
}

impl ScanRequest {
    /// Parse a raw client message.
    pub fn from_json(raw: &str) -> Result<Self, DashboardError> {
        serde_json::from_str(raw)
            .map_err(|e| DashboardError::config(format!("Invalid configuration message: {e}")))
    }

    /// Validate into [`ScanOptions`]. The target is trimmed; a missing or
    /// blank target is rejected, and so is one nmap would read as an option.
    pub fn into_options(self) -> Result<ScanOptions, DashboardError> {
        let target = self
            .target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DashboardError::config(MISSING_TARGET))?;
        if target.starts_with('-') {
            return Err(DashboardError::config(OPTION_LIKE_TARGET));
        }
        Ok(ScanOptions {
            target,
            profile: self.profile.unwrap_or_default(),
            no_ping: self.no_ping.unwrap_or(false),
            os_detect: self.os_detect.unwrap_or(false),
            vuln_scripts: self.vuln_scripts.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Nmap,
    Parsing,
    Ollama,
}

/// Server-to-client message, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServerMessage {
    Error {
        message: String,
    },
    Progress {
        step: Step,
        percent: u8,
        message: String,
    },
    Complete {
        percent: u8,
        message: String,
        data: Box<SessionResult>,
        export_json: String,
    },
}

impl ServerMessage {
    /// `error` and `complete` end the session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerMessage::Progress { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConfig,
    Scanning,
    Parsing,
    RequestingAnalysis,
    Complete,
    Error,
}

/// Why the pipeline stopped early.
enum Halt {
    Failed(DashboardError),
    Disconnected,
}

impl From<DashboardError> for Halt {
    fn from(e: DashboardError) -> Self {
        Halt::Failed(e)
    }
}

/// Drives one session. Holds no state shared with other sessions apart from
/// the read-only backends.
pub struct Session {
    executor: Arc<dyn ScanExecutor>,
    analyzer: Arc<dyn AnalysisBackend>,
    tx: mpsc::Sender<ServerMessage>,
    state: SessionState,
}

impl Session {
    pub fn new(
        executor: Arc<dyn ScanExecutor>,
        analyzer: Arc<dyn AnalysisBackend>,
        tx: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            executor,
            analyzer,
            tx,
            state: SessionState::AwaitingConfig,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the pipeline for the raw configuration message. Returns the final
    /// state; `Complete` and `Error` are reported to the client, a disconnect
    /// leaves the state where the pipeline stopped.
    pub async fn run(mut self, raw_config: &str) -> SessionState {
        match self.pipeline(raw_config).await {
            Ok(()) => {}
            Err(Halt::Failed(e)) => {
                match &e {
                    DashboardError::EmptyResult | DashboardError::Config(_) => {
                        warn!(kind = e.kind(), state = ?self.state, "session ended: {e}")
                    }
                    _ => error!(kind = e.kind(), state = ?self.state, "session failed: {e}"),
                }
                self.state = SessionState::Error;
                let _ = self
                    .tx
                    .send(ServerMessage::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
            Err(Halt::Disconnected) => {
                info!(state = ?self.state, "client disconnected, session abandoned");
            }
        }
        self.state
    }

    async fn pipeline(&mut self, raw_config: &str) -> Result<(), Halt> {
        let options = ScanRequest::from_json(raw_config)?.into_options()?;
        info!(host = %options.target, profile = %options.profile, "session configured");

        self.transition(
            SessionState::Scanning,
            Step::Nmap,
            10,
            format!("Starting nmap scan against {}...", options.target),
        )
        .await?;
        let raw = self.executor.execute(&options).await?;

        self.transition(
            SessionState::Parsing,
            Step::Parsing,
            50,
            "Scan finished. Processing results...".into(),
        )
        .await?;
        let scan = normalize::normalize(&raw)?;
        if scan.is_empty() {
            return Err(DashboardError::EmptyResult.into());
        }
        let (payload, compact) = encoder::encode(&scan)?;
        let token_stats = encoder::token_stats(&payload, &compact)?;
        info!(
            hosts = scan.summary.total_hosts,
            open_ports = scan.open_port_count(),
            json_tokens = token_stats.json_tokens,
            toon_tokens = token_stats.toon_tokens,
            "scan normalized"
        );

        self.transition(
            SessionState::RequestingAnalysis,
            Step::Ollama,
            60,
            "Analyzing exposure with the language model (Ollama)...".into(),
        )
        .await?;
        let analysis = self
            .analyzer
            .request_analysis(&compact, &options.target, options.profile)
            .await?;

        let result = SessionResult {
            scan,
            analysis,
            scan_log: raw.diagnostic_text,
            token_stats,
            meta: ScanMeta {
                tool: TOOL_NAME.to_string(),
                target: options.target,
                generated_at: now_utc(),
            },
        };
        let export_json = serde_json::to_string_pretty(&result.export_document())
            .map_err(DashboardError::from)?;

        self.state = SessionState::Complete;
        self.emit(ServerMessage::Complete {
            percent: 100,
            message: "Analysis finished.".into(),
            data: Box::new(result),
            export_json,
        })
        .await
    }

    async fn transition(
        &mut self,
        next: SessionState,
        step: Step,
        percent: u8,
        message: String,
    ) -> Result<(), Halt> {
        self.state = next;
        self.emit(ServerMessage::Progress {
            step,
            percent,
            message,
        })
        .await
    }

    async fn emit(&self, msg: ServerMessage) -> Result<(), Halt> {
        self.tx.send(msg).await.map_err(|_| Halt::Disconnected)
    }
}

/// RFC 3339 UTC timestamp, e.g. `2024-05-01T12:00:00.123Z`.
pub fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
