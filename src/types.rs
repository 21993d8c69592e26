use serde::{Deserialize, Serialize};

/// Tool name stamped into every export document.
pub const TOOL_NAME: &str = "nmap-ollama-dashboard";

/// Port sweep breadth.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Profile {
    /// Top 100 ports.
    #[default]
    Quick,
    /// All 65535 ports with aggressive timing.
    Full,
}

impl From<String> for Profile {
    fn from(s: String) -> Self {
        // Anything other than "quick" selects the full sweep.
        if s == "quick" {
            Profile::Quick
        } else {
            Profile::Full
        }
    }
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated options for one scan. `target` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub target: String,
    pub profile: Profile,
    pub no_ping: bool,
    pub os_detect: bool,
    pub vuln_scripts: bool,
}

/// Captured output of one scanner run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScanOutput {
    /// XML document written to stdout (possibly empty).
    pub structured_text: String,
    /// stderr log.
    pub diagnostic_text: String,
    pub exit_code: i32,
}

/// One open port on a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    #[serde(rename = "proto")]
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// A host with at least one open port. `ports` is sorted by port number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    #[serde(rename = "ip")]
    pub address: String,
    pub hostname: Option<String>,
    pub ports: Vec<PortRecord>,
}

/// Host counters. Both fields currently count the retained hosts; they are
/// kept apart so that a host-discovery count can diverge later.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total_hosts: usize,
    pub hosts_with_open_ports: usize,
}

/// Normalized scan: hosts in scanner order, open ports only.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalScan {
    pub summary: ScanSummary,
    pub hosts: Vec<HostRecord>,
}

impl CanonicalScan {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn open_port_count(&self) -> usize {
        self.hosts.iter().map(|h| h.ports.len()).sum()
    }
}

/// One (host, port) row of the flattened payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlatRow {
    pub ip: String,
    pub hostname: Option<String>,
    pub port: u16,
    pub proto: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// The structure that gets TOON-encoded and sent to the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub summary: ScanSummary,
    pub entries: Vec<FlatRow>,
}

/// Whitespace-word estimate of JSON vs TOON payload size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TokenStats {
    pub json_tokens: usize,
    pub toon_tokens: usize,
    pub saved_tokens: usize,
    pub saved_percent: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanMeta {
    pub tool: String,
    pub target: String,
    /// RFC 3339 UTC timestamp ending in `Z`.
    pub generated_at: String,
}

/// Everything a completed session reports back to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub scan: CanonicalScan,
    pub analysis: String,
    pub scan_log: String,
    pub token_stats: TokenStats,
    pub meta: ScanMeta,
}

/// Downloadable report: metadata, canonical scan and narrative. No payload.
#[derive(Serialize, Debug)]
pub struct ExportDocument<'a> {
    pub meta: &'a ScanMeta,
    pub scan: &'a CanonicalScan,
    pub analysis: &'a str,
}

impl SessionResult {
    pub fn export_document(&self) -> ExportDocument<'_> {
        ExportDocument {
            meta: &self.meta,
            scan: &self.scan,
            analysis: &self.analysis,
        }
    }
}
