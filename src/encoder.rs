use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use crate::error::{DashboardError, Result};
use crate::toon;
use crate::types::{CanonicalScan, EncodedPayload, FlatRow, TokenStats};

/// One row per (host, port): hosts in canonical order, ports in sorted order.
pub fn flatten(scan: &CanonicalScan) -> Vec<FlatRow> {
    scan.hosts
        .iter()
        .flat_map(|host| {
            host.ports.iter().map(move |p| FlatRow {
                ip: host.address.clone(),
                hostname: host.hostname.clone(),
                port: p.port,
                proto: p.protocol.clone(),
                service: p.service.clone(),
                product: p.product.clone(),
                version: p.version.clone(),
            })
        })
        .collect()
}

/// Flatten `scan` and TOON-encode `{summary, entries}`.
pub fn encode(scan: &CanonicalScan) -> Result<(EncodedPayload, String)> {
    let payload = EncodedPayload {
        summary: scan.summary,
        entries: flatten(scan),
    };
    let value = serde_json::to_value(&payload)?;
    Ok((payload, toon::encode(&value)))
}

/// Inverse of [`encode`] on the compact text.
pub fn decode(compact: &str) -> Result<EncodedPayload> {
    let value = toon::decode(compact)?;
    Ok(serde_json::from_value(value)?)
}

/// Crude token count: whitespace-separated words. Not a model tokenizer.
pub fn estimate_tokens(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Single-line JSON with `", "` between items and `": "` after keys.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// The verbose baseline for token counting: one line, spaced separators,
/// non-ASCII left as is.
pub fn verbose_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| DashboardError::Encoding(e.to_string()))
}

/// Compare the verbose JSON form of `payload` (field names repeated per row)
/// with the compact text. `saved_percent` is rounded to one decimal.
pub fn token_stats(payload: &EncodedPayload, compact: &str) -> Result<TokenStats> {
    let verbose = verbose_json(payload)?;
    Ok(stats_from_counts(
        estimate_tokens(&verbose),
        estimate_tokens(compact),
    ))
}

pub fn stats_from_counts(json_tokens: usize, toon_tokens: usize) -> TokenStats {
    let saved_tokens = json_tokens.saturating_sub(toon_tokens);
    let saved_percent = if json_tokens > 0 {
        saved_tokens as f64 / json_tokens as f64 * 100.0
    } else {
        0.0
    };
    TokenStats {
        json_tokens,
        toon_tokens,
        saved_tokens,
        saved_percent: (saved_percent * 10.0).round() / 10.0,
    }
}
