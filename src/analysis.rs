use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{DashboardError, Result};
use crate::types::Profile;

/// Chat endpoint path, joined onto the configured base URL.
pub const CHAT_PATH: &str = "/api/chat";

/// Produces the narrative audit for a compact scan payload.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn request_analysis(
        &self,
        compact_text: &str,
        target: &str,
        profile: Profile,
    ) -> Result<String>;
}

/// Build the audit prompt around the TOON payload.
pub fn build_prompt(compact_text: &str, target: &str, profile: Profile) -> String {
    format!(
        r#"Act as a Senior Cybersecurity Auditor (SecOps).

OBJECTIVE:
Perform a technical and network-behaviour audit based on the Nmap scan (TOON format, {profile} profile) of the target: {target}.

INPUT DATA (Nmap TOON):
{compact_text}

OUTPUT INSTRUCTIONS (use strict Markdown with these headings):

1. Executive Summary:
   - Host health diagnosis and a risk score (1-10).
   - Attack surface (number of exposed ports).

2. Risk Matrix:
   - Table: [Port | Service | Version | Severity | CVE/Risk].
   - Flag outdated versions as CRITICAL.

3. Deep Technical Analysis:
   - Explain the attack vectors of the critical ports detected.
   - Identify information leaks in banners (OS, exact versions).

4. Traffic and Latency Pattern Analysis:
   - Connectivity: contrast 'closed' ports (active rejection/RST) with 'filtered' ports (silence/drop). What does this say about a firewall?
   - Latency/Performance: if Nmap found services but no versions, does that suggest slowness or timeouts?
   - Anomalies: non-standard open ports (e.g. SSH on 2222) or sequential port patterns?

5. Remediation Plan:
   - Exact technical commands (iptables, service configuration).
   - Defense in Depth strategies.

IMPORTANT:
- Be technical and concise.
- If you see many 'filtered' ports, assume a firewall/IPS is dropping packets."#
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Non-streaming client for an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    chat_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DashboardError::analysis(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            chat_url: chat_url(base_url),
            model: model.into(),
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// `base_url` with [`CHAT_PATH`] appended; a trailing slash is tolerated.
pub fn chat_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), CHAT_PATH)
}

#[async_trait]
impl AnalysisBackend for OllamaClient {
    async fn request_analysis(
        &self,
        compact_text: &str,
        target: &str,
        profile: Profile,
    ) -> Result<String> {
        let prompt = build_prompt(compact_text, target, profile);
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            stream: false,
        };

        debug!(url = %self.chat_url, model = %self.model, prompt_chars = prompt.len(), "requesting analysis");
        let start = Instant::now();

        let resp = self
            .client
            .post(&self.chat_url)
            .json(&body)
            .send()
            .await
            .map_err(DashboardError::analysis)?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(DashboardError::analysis(format!(
                "model endpoint returned {status}: {}",
                detail.trim()
            )));
        }

        let parsed: ChatResponse = resp.json().await.map_err(DashboardError::analysis)?;
        let content = parsed
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| DashboardError::analysis("response has no message.content field"))?;

        info!(
            model = %self.model,
            chars = content.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis received"
        );
        Ok(content)
    }
}
