mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use nmap_ollama_dashboard::analysis::{AnalysisBackend, OllamaClient};
use nmap_ollama_dashboard::error::{DashboardError, Result};
use nmap_ollama_dashboard::scanner::ScanExecutor;
use nmap_ollama_dashboard::session::{
    ServerMessage, Session, SessionState, Step, MISSING_TARGET, OPTION_LIKE_TARGET,
};
use nmap_ollama_dashboard::types::{Profile, RawScanOutput, ScanOptions};
use serde_json::json;
use tokio::sync::mpsc;

enum Scan {
    Xml(&'static str),
    Fails(&'static str),
}

struct FakeScanner {
    outcome: Scan,
    calls: AtomicUsize,
    seen: std::sync::Mutex<Option<ScanOptions>>,
}

impl FakeScanner {
    fn new(outcome: Scan) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
            seen: std::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl ScanExecutor for FakeScanner {
    async fn execute(&self, options: &ScanOptions) -> Result<RawScanOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some(options.clone());
        match self.outcome {
            Scan::Xml(xml) => Ok(RawScanOutput {
                structured_text: xml.to_string(),
                diagnostic_text: "Initiating SYN Stealth Scan".into(),
                exit_code: 0,
            }),
            Scan::Fails(diag) => Err(DashboardError::Execution {
                message: format!("nmap execution failed:\n{diag}"),
                diagnostics: diag.to_string(),
            }),
        }
    }
}

struct FakeAnalyzer {
    reply: Option<&'static str>,
    calls: AtomicUsize,
}

impl FakeAnalyzer {
    fn new(reply: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnalysisBackend for FakeAnalyzer {
    async fn request_analysis(&self, compact: &str, target: &str, _profile: Profile) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(compact.contains("entries["));
        match self.reply {
            Some(r) => Ok(format!("{r} for {target}")),
            None => Err(DashboardError::analysis("model endpoint returned 503")),
        }
    }
}

async fn run(
    scanner: Arc<dyn ScanExecutor>,
    analyzer: Arc<dyn AnalysisBackend>,
    config: &str,
) -> (SessionState, Vec<ServerMessage>) {
    let (tx, mut rx) = mpsc::channel(16);
    let state = Session::new(scanner, analyzer, tx).run(config).await;
    let mut out = Vec::new();
    while let Some(m) = rx.recv().await {
        out.push(m);
    }
    (state, out)
}

fn progress_steps(msgs: &[ServerMessage]) -> Vec<(Step, u8)> {
    msgs.iter()
        .filter_map(|m| match m {
            ServerMessage::Progress { step, percent, .. } => Some((*step, *percent)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn scenario_a_completes_with_only_the_open_port() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));
    let analyzer = FakeAnalyzer::new(Some("audit"));

    let (state, msgs) = run(
        scanner.clone(),
        analyzer.clone(),
        r#"{"target":"192.0.2.10","profile":"quick"}"#,
    )
    .await;

    assert_eq!(state, SessionState::Complete);
    assert_eq!(
        progress_steps(&msgs),
        vec![(Step::Nmap, 10), (Step::Parsing, 50), (Step::Ollama, 60)]
    );
    assert_eq!(msgs.len(), 4);

    let seen = scanner.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.target, "192.0.2.10");
    assert_eq!(seen.profile, Profile::Quick);

    match msgs.last().unwrap() {
        ServerMessage::Complete {
            percent,
            data,
            export_json,
            ..
        } => {
            assert_eq!(*percent, 100);
            assert_eq!(data.scan.hosts.len(), 1);
            let ports: Vec<u16> = data.scan.hosts[0].ports.iter().map(|p| p.port).collect();
            assert_eq!(ports, vec![22]);
            assert_eq!(data.analysis, "audit for 192.0.2.10");
            assert_eq!(data.scan_log, "Initiating SYN Stealth Scan");
            assert_eq!(data.meta.tool, "nmap-ollama-dashboard");
            assert_eq!(data.meta.target, "192.0.2.10");
            assert!(data.meta.generated_at.ends_with('Z'));
            assert!(data.token_stats.json_tokens > data.token_stats.toon_tokens);

            let export: serde_json::Value = serde_json::from_str(export_json).unwrap();
            assert_eq!(export["meta"]["target"], "192.0.2.10");
            assert_eq!(export["scan"]["hosts"][0]["ports"][0]["port"], 22);
            assert_eq!(export["analysis"], "audit for 192.0.2.10");
            assert!(export.get("entries").is_none() && export.get("token_stats").is_none());
            assert!(export_json.contains("\n  \"meta\""), "export is pretty-printed");
        }
        other => panic!("expected complete, got {other:?}"),
    }
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_b_no_open_ports_skips_analysis() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_NOTHING_OPEN));
    let analyzer = FakeAnalyzer::new(Some("unused"));

    let (state, msgs) = run(scanner, analyzer.clone(), r#"{"target":"192.0.2.20"}"#).await;

    assert_eq!(state, SessionState::Error);
    assert_eq!(progress_steps(&msgs), vec![(Step::Nmap, 10), (Step::Parsing, 50)]);
    assert_eq!(
        msgs.last(),
        Some(&ServerMessage::Error {
            message: DashboardError::EmptyResult.to_string()
        })
    );
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_c_missing_target_never_scans() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));
    let analyzer = FakeAnalyzer::new(Some("unused"));

    let (state, msgs) = run(scanner.clone(), analyzer, r#"{"profile":"full"}"#).await;

    assert_eq!(state, SessionState::Error);
    assert_eq!(
        msgs,
        vec![ServerMessage::Error {
            message: MISSING_TARGET.into()
        }]
    );
    assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn option_like_target_never_reaches_the_scanner() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));

    let (state, msgs) = run(
        scanner.clone(),
        FakeAnalyzer::new(None),
        r#"{"target":"--script=/tmp/evil.nse"}"#,
    )
    .await;

    assert_eq!(state, SessionState::Error);
    assert_eq!(
        msgs,
        vec![ServerMessage::Error {
            message: OPTION_LIKE_TARGET.into()
        }]
    );
    assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_config_message_is_reported() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));
    let (state, msgs) = run(scanner.clone(), FakeAnalyzer::new(None), "not json").await;

    assert_eq!(state, SessionState::Error);
    assert!(matches!(&msgs[..], [ServerMessage::Error { message }] if message.starts_with("Invalid configuration")));
    assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_scanner_failure_carries_diagnostics() {
    let scanner = FakeScanner::new(Scan::Fails("Failed to resolve \"nohost.invalid\"."));
    let analyzer = FakeAnalyzer::new(Some("unused"));

    let (state, msgs) = run(scanner, analyzer.clone(), r#"{"target":"nohost.invalid"}"#).await;

    assert_eq!(state, SessionState::Error);
    // No `parsing` step means the normalizer never ran.
    assert_eq!(progress_steps(&msgs), vec![(Step::Nmap, 10)]);
    match msgs.last().unwrap() {
        ServerMessage::Error { message } => assert!(message.contains("Failed to resolve")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_e_model_http_500_fails_after_parsing() {
    let (base, seen) = common::spawn_chat_stub(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": "boom"}),
    )
    .await;
    let ollama = OllamaClient::new(&base, "llama3.2", Duration::from_secs(5)).unwrap();
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));

    let (state, msgs) = run(scanner, Arc::new(ollama), r#"{"target":"192.0.2.10"}"#).await;

    assert_eq!(state, SessionState::Error);
    assert_eq!(
        progress_steps(&msgs),
        vec![(Step::Nmap, 10), (Step::Parsing, 50), (Step::Ollama, 60)]
    );
    assert!(matches!(msgs.last(), Some(ServerMessage::Error { message }) if message.contains("500")));
    assert!(!msgs.iter().any(|m| matches!(m, ServerMessage::Complete { .. })));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn disconnected_client_ends_silently() {
    let scanner = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));
    let analyzer = FakeAnalyzer::new(Some("audit"));
    let (tx, rx) = mpsc::channel(16);
    drop(rx);

    let state = Session::new(scanner.clone(), analyzer.clone(), tx)
        .run(r#"{"target":"192.0.2.10"}"#)
        .await;

    // The first progress send fails, so nothing downstream runs.
    assert_eq!(state, SessionState::Scanning);
    assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let ok = FakeScanner::new(Scan::Xml(common::ONE_HOST_SSH_OPEN_HTTP_CLOSED));
    let bad = FakeScanner::new(Scan::Fails("permission denied"));
    let analyzer = FakeAnalyzer::new(Some("audit"));

    let (a, b) = tokio::join!(
        run(ok, analyzer.clone(), r#"{"target":"192.0.2.10"}"#),
        run(bad, analyzer.clone(), r#"{"target":"192.0.2.11"}"#),
    );
    assert_eq!(a.0, SessionState::Complete);
    assert_eq!(b.0, SessionState::Error);
}
