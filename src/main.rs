use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use nmap_ollama_dashboard::config::{self, AppConfig};
use nmap_ollama_dashboard::logging;
use nmap_ollama_dashboard::server::{self, AppState};
use nmap_ollama_dashboard::session::{ServerMessage, Session};
use nmap_ollama_dashboard::types::{CanonicalScan, SessionResult};

/// Run nmap against a target and get a security audit from a local Ollama model.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nmap-ollama-dashboard",
    version,
    about = "Run nmap against a target, compact the results and get a security audit from a local Ollama model.",
    long_about = None
)]
struct Cli {
    /// Address the web dashboard listens on.
    #[arg(long, env = "DASHBOARD_BIND", default_value = config::DEFAULT_BIND)]
    bind: String,

    /// Directory with the dashboard's static files.
    #[arg(long = "ui-dir", default_value = config::DEFAULT_UI_DIR)]
    ui_dir: PathBuf,

    /// nmap executable.
    #[arg(long = "nmap-bin", env = "NMAP_BIN", default_value = config::DEFAULT_NMAP_BIN)]
    nmap_bin: String,

    /// Ollama base URL; `/api/chat` is appended.
    #[arg(long = "ollama-url", env = "OLLAMA_URL", default_value = config::DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Model used for the audit.
    #[arg(long, env = "OLLAMA_MODEL", default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Timeout for the analysis request, in seconds.
    #[arg(long = "analysis-timeout-secs", default_value_t = config::DEFAULT_ANALYSIS_TIMEOUT_SECS)]
    analysis_timeout_secs: u64,

    /// Run one scan from the command line instead of serving the dashboard.
    #[arg(long)]
    target: Option<String>,

    /// Port sweep for --target.
    #[arg(long, default_value = "quick", value_parser = ["quick", "full"])]
    profile: String,

    /// Skip host discovery (-Pn).
    #[arg(long = "no-ping", default_value_t = false)]
    no_ping: bool,

    /// Enable OS detection (-O).
    #[arg(long = "os-detect", default_value_t = false)]
    os_detect: bool,

    /// Run the `vuln` script category.
    #[arg(long = "vuln-scripts", default_value_t = false)]
    vuln_scripts: bool,

    /// Write the export document as pretty JSON to this path (--target only).
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        AppConfig {
            bind: self.bind.clone(),
            ui_dir: self.ui_dir.clone(),
            nmap_bin: self.nmap_bin.clone(),
            ollama_url: self.ollama_url.clone(),
            model: self.model.clone(),
            analysis_timeout: Duration::from_secs(self.analysis_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging()?;

    let config = cli.app_config();
    config.validate()?;

    if let Some(target) = cli.target.as_deref() {
        return run_once(&cli, &config, target).await;
    }

    println!("nmap-ollama-dashboard configuration:");
    println!("  bind         : {}", config.bind);
    println!("  ui_dir       : {}", config.ui_dir.display());
    println!("  nmap         : {}", config.nmap_bin);
    println!("  ollama       : {}", config.ollama_url);
    println!("  model        : {}", config.model);
    println!("  timeout_secs : {}", config.analysis_timeout.as_secs());
    println!("Dashboard at http://{} (Ctrl+C to stop)", config.bind);

    tokio::select! {
        res = server::spawn_server(&config) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

/// Headless single session: progress on stdout, then the port table and the analysis.
async fn run_once(cli: &Cli, config: &AppConfig, target: &str) -> Result<()> {
    let state = AppState::from_config(config)?;
    let raw_config = serde_json::json!({
        "target": target,
        "profile": cli.profile,
        "no_ping": cli.no_ping,
        "os_detect": cli.os_detect,
        "vuln_scripts": cli.vuln_scripts,
    })
    .to_string();

    let (tx, mut rx) = mpsc::channel(8);
    let session = Session::new(state.executor(), state.analyzer(), tx);
    let task = tokio::spawn(async move { session.run(&raw_config).await });

    let mut outcome: Option<Result<Box<SessionResult>, String>> = None;
    while let Some(msg) = rx.recv().await {
        match msg {
            ServerMessage::Progress {
                percent, message, ..
            } => println!("[{percent:>3}%] {message}"),
            ServerMessage::Complete {
                message,
                data,
                export_json,
                ..
            } => {
                println!("[100%] {message}");
                if let Some(path) = cli.output.as_deref() {
                    match std::fs::write(path, &export_json) {
                        Ok(()) => println!("Wrote export JSON to {}", path.display()),
                        Err(e) => eprintln!("Failed to write JSON to {}: {}", path.display(), e),
                    }
                }
                outcome = Some(Ok(data));
            }
            ServerMessage::Error { message } => outcome = Some(Err(message)),
        }
    }
    task.await?;

    match outcome {
        Some(Ok(result)) => {
            print_results_table(&result.scan);
            let t = &result.token_stats;
            println!(
                "\nPayload tokens (approx): json={} toon={} saved={} ({:.1}%)",
                t.json_tokens, t.toon_tokens, t.saved_tokens, t.saved_percent
            );
            println!("\n{}", result.analysis);
            Ok(())
        }
        Some(Err(message)) => bail!(message),
        None => bail!("session ended without a result"),
    }
}

fn print_results_table(scan: &CanonicalScan) {
    let mut ip_w = "ip".len();
    let mut svc_w = "service".len();
    let mut ver_w = "version".len();
    for h in &scan.hosts {
        ip_w = ip_w.max(h.address.len());
        for p in &h.ports {
            svc_w = svc_w.max(p.service.as_deref().unwrap_or("").len());
            let ver = version_label(p.product.as_deref(), p.version.as_deref());
            ver_w = ver_w.max(ver.chars().count().min(50));
        }
    }
    let port_w = "port/proto".len().max(9);

    println!(
        "\nOpen ports: {} on {} host(s)",
        scan.open_port_count(),
        scan.summary.total_hosts
    );
    println!(
        "{:<ip_w$}  {:<port_w$}  {:<svc_w$}  {:<ver_w$}",
        "ip", "port/proto", "service", "version",
    );
    println!(
        "{:-<ip_w$}  {:-<port_w$}  {:-<svc_w$}  {:-<ver_w$}",
        "", "", "", "",
    );
    for h in &scan.hosts {
        for p in &h.ports {
            let ver: String = version_label(p.product.as_deref(), p.version.as_deref())
                .chars()
                .take(50)
                .collect();
            println!(
                "{:<ip_w$}  {:<port_w$}  {:<svc_w$}  {:<ver_w$}",
                h.address,
                format!("{}/{}", p.port, p.protocol),
                p.service.as_deref().unwrap_or(""),
                ver,
            );
        }
    }
}

fn version_label(product: Option<&str>, version: Option<&str>) -> String {
    match (product, version) {
        (Some(p), Some(v)) => format!("{p} {v}"),
        (Some(p), None) => p.to_string(),
        (None, Some(v)) => v.to_string(),
        (None, None) => String::new(),
    }
}
