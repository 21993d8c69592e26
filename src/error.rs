use thiserror::Error;

use crate::toon::ToonError;

/// Session-terminating failures. `Display` is the text sent to the client.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Bad or missing client input.
    #[error("{0}")]
    Config(String),

    /// The scanner could not be started or exited non-zero.
    #[error("{message}")]
    Execution { message: String, diagnostics: String },

    /// Scanner output is not well-formed XML.
    #[error("failed to parse nmap XML output: {0}")]
    Parse(#[from] roxmltree::Error),

    /// Scan succeeded without any open port.
    #[error("Nmap finished but no open ports were detected.")]
    EmptyResult,

    /// Model endpoint unreachable, non-2xx, or missing `message.content`.
    #[error("analysis request failed: {0}")]
    Analysis(String),

    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

impl DashboardError {
    pub fn config(msg: impl Into<String>) -> Self {
        DashboardError::Config(msg.into())
    }

    pub fn analysis(msg: impl std::fmt::Display) -> Self {
        DashboardError::Analysis(msg.to_string())
    }

    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DashboardError::Config(_) => "config",
            DashboardError::Execution { .. } => "execution",
            DashboardError::Parse(_) => "parse",
            DashboardError::EmptyResult => "empty_result",
            DashboardError::Analysis(_) => "analysis",
            DashboardError::Encoding(_) => "encoding",
        }
    }
}

impl From<ToonError> for DashboardError {
    fn from(e: ToonError) -> Self {
        DashboardError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(e: serde_json::Error) -> Self {
        DashboardError::Encoding(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
