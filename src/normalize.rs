//! nmap XML (`-oX`) to [`CanonicalScan`].
//!
//! Only open ports survive. Hosts left without any open port are dropped, so
//! every host in the result has at least one port.
use roxmltree::{Document, Node, ParsingOptions};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{CanonicalScan, HostRecord, PortRecord, RawScanOutput, ScanSummary};

/// Address reported for a host without any `<address>` element.
pub const UNKNOWN_ADDRESS: &str = "unknown";

const OPEN: &str = "open";

/// Normalize raw scanner output.
///
/// Empty output, or a document whose root is not `<nmaprun>`, yields an empty
/// scan. Only XML that is not well-formed is an error.
pub fn normalize(raw: &RawScanOutput) -> Result<CanonicalScan> {
    normalize_xml(&raw.structured_text)
}

pub fn normalize_xml(xml: &str) -> Result<CanonicalScan> {
    if xml.trim().is_empty() {
        return Ok(CanonicalScan::default());
    }

    // nmap emits `<!DOCTYPE nmaprun>`.
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options)?;
    let root = doc.root_element();
    if root.tag_name().name() != "nmaprun" {
        debug!(root = root.tag_name().name(), "unexpected root element, no hosts");
        return Ok(CanonicalScan::default());
    }

    let hosts: Vec<HostRecord> = as_sequence(root, "host")
        .into_iter()
        .filter_map(normalize_host)
        .collect();

    let summary = ScanSummary {
        total_hosts: hosts.len(),
        hosts_with_open_ports: hosts.len(),
    };
    Ok(CanonicalScan { summary, hosts })
}

/// Every child element of `parent` named `tag`, in document order. One match
/// and many matches come back the same way.
pub fn as_sequence<'a, 'input>(parent: Node<'a, 'input>, tag: &str) -> Vec<Node<'a, 'input>> {
    parent
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == tag)
        .collect()
}

fn first<'a, 'input>(parent: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    as_sequence(parent, tag).into_iter().next()
}

fn attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn normalize_host(host: Node<'_, '_>) -> Option<HostRecord> {
    let address = first(host, "address")
        .and_then(|a| attr(a, "addr"))
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

    let hostname = first(host, "hostnames")
        .and_then(|hs| first(hs, "hostname"))
        .and_then(|h| attr(h, "name"));

    let mut ports: Vec<PortRecord> = first(host, "ports")
        .map(|ps| as_sequence(ps, "port"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| open_port(p, &address))
        .collect();

    if ports.is_empty() {
        debug!(%address, "host has no open ports, dropping");
        return None;
    }
    // Stable: equal port numbers keep scanner order.
    ports.sort_by_key(|p| p.port);

    Some(HostRecord {
        address,
        hostname,
        ports,
    })
}

fn open_port(port: Node<'_, '_>, address: &str) -> Option<PortRecord> {
    let state = first(port, "state").and_then(|s| s.attribute("state"));
    if state != Some(OPEN) {
        return None;
    }

    let raw_id = port.attribute("portid").unwrap_or_default();
    let number = match raw_id.parse::<u16>() {
        Ok(n) if n > 0 => n,
        _ => {
            warn!(%address, portid = raw_id, "skipping port with invalid portid");
            return None;
        }
    };

    let service = first(port, "service");
    Some(PortRecord {
        port: number,
        protocol: attr(port, "protocol").unwrap_or_else(|| "tcp".to_string()),
        state: OPEN.to_string(),
        service: service.and_then(|s| attr(s, "name")),
        product: service.and_then(|s| attr(s, "product")),
        version: service.and_then(|s| attr(s, "version")),
    })
}
