use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DashboardError, Result};
use crate::types::{Profile, RawScanOutput, ScanOptions};

/// Runs a port scan for one session.
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    async fn execute(&self, options: &ScanOptions) -> Result<RawScanOutput>;
}

/// Scan executor backed by the `nmap` binary.
#[derive(Debug, Clone)]
pub struct NmapExecutor {
    binary: String,
}

impl NmapExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl Default for NmapExecutor {
    fn default() -> Self {
        Self::new("nmap")
    }
}

/// Build the nmap argument list for `options`.
///
/// - always: service/version detection, default scripts, verbose
/// - `quick`: top 100 ports; `full`: every port with T4 timing
/// - optional `-Pn`, `-O`, `--script vuln`
/// - XML to stdout, then the target last
pub fn build_args(options: &ScanOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["-sV".into(), "-sC".into(), "-v".into()];

    match options.profile {
        Profile::Quick => args.extend(["--top-ports".into(), "100".into()]),
        Profile::Full => args.extend(["-p-".into(), "-T4".into()]),
    }

    if options.no_ping {
        args.push("-Pn".into());
    }
    if options.os_detect {
        args.push("-O".into());
    }
    if options.vuln_scripts {
        args.extend(["--script".into(), "vuln".into()]);
    }

    args.extend(["-oX".into(), "-".into(), options.target.clone()]);
    args
}

#[async_trait]
impl ScanExecutor for NmapExecutor {
    async fn execute(&self, options: &ScanOptions) -> Result<RawScanOutput> {
        let args = build_args(options);
        debug!(binary = %self.binary, ?args, "spawning scanner");
        let start = Instant::now();

        // The child is killed if the session future is dropped mid-scan.
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DashboardError::Execution {
                message: format!("failed to start {}: {e}", self.binary),
                diagnostics: String::new(),
            })?;

        let structured_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let diagnostic_text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        // No exit code means the process was killed by a signal.
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            warn!(host = %options.target, exit_code, "scanner exited with failure");
            return Err(DashboardError::Execution {
                message: format!("nmap execution failed:\n{diagnostic_text}"),
                diagnostics: diagnostic_text,
            });
        }

        info!(
            host = %options.target,
            exit_code,
            xml_bytes = structured_text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "scan finished"
        );
        Ok(RawScanOutput {
            structured_text,
            diagnostic_text,
            exit_code,
        })
    }
}
