//! Token-Oriented Object Notation (TOON): a compact, indentation-based text
//! encoding of JSON values.
//!
//! Uniform arrays of flat objects are written as a table: the field names once
//! in the header, then one comma-separated row per element. That is where the
//! savings over plain JSON come from when a payload is mostly rows.
//!
//! ```text
//! summary:
//!   total_hosts: 1
//!   hosts_with_open_ports: 1
//! entries[2]{ip,port,service}:
//!   192.0.2.10,22,ssh
//!   192.0.2.10,443,https
//! ```
use serde_json::{Map, Number, Value};
use thiserror::Error;

const INDENT: &str = "  ";
const DELIMITER: char = ',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToonError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: expected {expected} rows/items, found {found}")]
    LengthMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
}

fn syntax(line: usize, message: impl Into<String>) -> ToonError {
    ToonError::Syntax {
        line,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a JSON value as TOON text. Object field order is preserved.
pub fn encode(value: &Value) -> String {
    let mut out: Vec<String> = Vec::new();
    match value {
        Value::Object(map) => encode_object(map, 0, &mut out),
        Value::Array(items) => encode_array(None, items, 0, &mut out),
        other => out.push(encode_primitive(other)),
    }
    out.join("\n")
}

fn indent(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn encode_object(map: &Map<String, Value>, depth: usize, out: &mut Vec<String>) {
    for (key, value) in map {
        encode_field(key, value, depth, out);
    }
}

fn encode_field(key: &str, value: &Value, depth: usize, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            out.push(format!("{}{}:", indent(depth), encode_key(key)));
            encode_object(map, depth + 1, out);
        }
        Value::Array(items) => encode_array(Some(key), items, depth, out),
        prim => out.push(format!(
            "{}{}: {}",
            indent(depth),
            encode_key(key),
            encode_primitive(prim)
        )),
    }
}

/// Writes an array header (and its body) at `depth`. The first pushed line
/// is the header; callers that need it on a list-item line patch it in place.
fn encode_array(key: Option<&str>, items: &[Value], depth: usize, out: &mut Vec<String>) {
    let prefix = format!(
        "{}{}[{}]",
        indent(depth),
        key.map(encode_key).unwrap_or_default(),
        items.len()
    );

    if items.is_empty() {
        out.push(format!("{prefix}:"));
        return;
    }

    if items.iter().all(is_primitive) {
        let row = items
            .iter()
            .map(encode_primitive)
            .collect::<Vec<_>>()
            .join(&DELIMITER.to_string());
        out.push(format!("{prefix}: {row}"));
        return;
    }

    if let Some(fields) = tabular_fields(items) {
        let header = fields
            .iter()
            .map(|f| encode_key(f))
            .collect::<Vec<_>>()
            .join(&DELIMITER.to_string());
        out.push(format!("{prefix}{{{header}}}:"));
        for item in items {
            if let Value::Object(map) = item {
                let row = fields
                    .iter()
                    .map(|f| encode_primitive(map.get(f.as_str()).unwrap_or(&Value::Null)))
                    .collect::<Vec<_>>()
                    .join(&DELIMITER.to_string());
                out.push(format!("{}{}", indent(depth + 1), row));
            }
        }
        return;
    }

    out.push(format!("{prefix}:"));
    for item in items {
        encode_list_item(item, depth + 1, out);
    }
}

fn encode_list_item(item: &Value, depth: usize, out: &mut Vec<String>) {
    let hyphen = format!("{}- ", indent(depth));
    match item {
        Value::Object(map) if map.is_empty() => out.push(format!("{}-", indent(depth))),
        Value::Object(map) => {
            // First field shares the hyphen line; its content sits one level
            // deeper than the hyphen, as do the remaining fields.
            let start = out.len();
            let mut fields = map.iter();
            if let Some((key, value)) = fields.next() {
                encode_field(key, value, depth + 1, out);
                out[start] = format!("{}{}", hyphen, out[start].trim_start());
            }
            for (key, value) in fields {
                encode_field(key, value, depth + 1, out);
            }
        }
        Value::Array(items) => {
            let start = out.len();
            encode_array(None, items, depth + 1, out);
            out[start] = format!("{}{}", hyphen, out[start].trim_start());
        }
        prim => out.push(format!("{}{}", hyphen, encode_primitive(prim))),
    }
}

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

/// Field list for tabular form: every element is a non-empty object with the
/// same key set and only primitive values. Column order follows the first row.
fn tabular_fields(items: &[Value]) -> Option<Vec<String>> {
    let first = items.first()?.as_object()?;
    if first.is_empty() {
        return None;
    }
    let fields: Vec<String> = first.keys().cloned().collect();
    for item in items {
        let map = item.as_object()?;
        if map.len() != fields.len() {
            return None;
        }
        for f in &fields {
            if !is_primitive(map.get(f)?) {
                return None;
            }
        }
    }
    Some(fields)
}

fn encode_primitive(v: &Value) -> String {
    match v {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => encode_string(s),
        // Callers never pass containers here.
        Value::Array(_) | Value::Object(_) => "null".into(),
    }
}

fn encode_key(key: &str) -> String {
    if is_bare_key(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

fn is_bare_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn encode_string(s: &str) -> String {
    if needs_quotes(s) {
        quote(s)
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s.trim() != s
        || matches!(s, "true" | "false" | "null")
        || looks_numeric(s)
        || looks_like_padded_digits(s)
        || s.starts_with('-')
        || s.chars().any(|c| {
            matches!(c, ':' | '"' | '\\' | '[' | ']' | '{' | '}' | '#') || c == DELIMITER || c.is_control()
        })
}

/// JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
fn looks_numeric(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if b.get(i) == Some(&b'-') {
        i += 1;
    }
    match b.get(i) {
        Some(b'0') => i += 1,
        Some(c) if c.is_ascii_digit() => {
            while b.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
        }
        _ => return false,
    }
    if b.get(i) == Some(&b'.') {
        i += 1;
        let start = i;
        while b.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    if matches!(b.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        if matches!(b.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let start = i;
        while b.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == b.len()
}

// "007" is not a JSON number, but a reader would take it for one.
fn looks_like_padded_digits(s: &str) -> bool {
    s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit())
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    no: usize,
    depth: usize,
    text: &'a str,
}

struct Cursor<'a> {
    lines: Vec<Line<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<Line<'a>> {
        self.lines.get(self.pos).copied()
    }

    fn at_depth(&self, depth: usize) -> Option<Line<'a>> {
        self.peek().filter(|l| l.depth == depth)
    }

    fn advance(&mut self) -> Option<Line<'a>> {
        let line = self.peek();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }
}

/// Decode TOON text back into a JSON value.
pub fn decode(input: &str) -> Result<Value, ToonError> {
    let mut lines = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let spaces = raw.len() - raw.trim_start_matches(' ').len();
        if spaces % INDENT.len() != 0 {
            return Err(syntax(idx + 1, "indentation is not a multiple of two spaces"));
        }
        lines.push(Line {
            no: idx + 1,
            depth: spaces / INDENT.len(),
            text: raw[spaces..].trim_end(),
        });
    }

    let mut cur = Cursor { lines, pos: 0 };
    let first = match cur.peek() {
        None => return Ok(Value::Object(Map::new())),
        Some(l) => l,
    };
    if first.depth != 0 {
        return Err(syntax(first.no, "document must start at column 0"));
    }

    let value = if first.text.starts_with('[') {
        cur.advance();
        let header = parse_header(first.text, first.no)?;
        decode_array_body(&header, first.no, 0, &mut cur)?
    } else if cur.lines.len() == 1 && split_key(first.text).is_none() {
        cur.advance();
        parse_primitive(first.text, first.no)?
    } else {
        Value::Object(decode_object(&mut cur, 0)?)
    };

    if let Some(extra) = cur.peek() {
        return Err(syntax(extra.no, "unexpected trailing content"));
    }
    Ok(value)
}

fn decode_object(cur: &mut Cursor<'_>, depth: usize) -> Result<Map<String, Value>, ToonError> {
    let mut map = Map::new();
    while let Some(line) = cur.peek() {
        if line.depth < depth {
            break;
        }
        if line.depth > depth {
            return Err(syntax(line.no, "unexpected indentation"));
        }
        if line.text.starts_with("- ") || line.text == "-" {
            break;
        }
        cur.advance();
        let (key, value) = decode_field(line.text, line.no, depth, cur)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Decodes one `key...` field whose text sits at `depth`; nested content is
/// read from the cursor at `depth + 1`.
fn decode_field(
    text: &str,
    no: usize,
    depth: usize,
    cur: &mut Cursor<'_>,
) -> Result<(String, Value), ToonError> {
    let (key, rest) = split_key(text).ok_or_else(|| syntax(no, "expected `key:` or `key[N]`"))?;

    if rest.starts_with('[') {
        let header = parse_header(rest, no)?;
        let value = decode_array_body(&header, no, depth, cur)?;
        return Ok((key, value));
    }

    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| syntax(no, "expected `:` after key"))?
        .trim();
    if rest.is_empty() {
        let nested = decode_object(cur, depth + 1)?;
        return Ok((key, Value::Object(nested)));
    }
    Ok((key, parse_primitive(rest, no)?))
}

struct Header<'a> {
    len: usize,
    fields: Option<Vec<String>>,
    inline: &'a str,
}

/// Parses `[N]`, optional `{f1,f2}`, then `:` and any inline values.
fn parse_header(text: &str, no: usize) -> Result<Header<'_>, ToonError> {
    let body = text
        .strip_prefix('[')
        .ok_or_else(|| syntax(no, "expected `[`"))?;
    let close = body.find(']').ok_or_else(|| syntax(no, "unterminated `[`"))?;
    let len: usize = body[..close]
        .parse()
        .map_err(|_| syntax(no, format!("invalid array length `{}`", &body[..close])))?;
    let mut rest = &body[close + 1..];

    let mut fields = None;
    if let Some(inner) = rest.strip_prefix('{') {
        let end = find_unquoted(inner, '}').ok_or_else(|| syntax(no, "unterminated `{`"))?;
        let names = split_delimited(&inner[..end])
            .into_iter()
            .map(|f| parse_key_token(f.trim(), no))
            .collect::<Result<Vec<_>, _>>()?;
        fields = Some(names);
        rest = &inner[end + 1..];
    }

    let inline = rest
        .strip_prefix(':')
        .ok_or_else(|| syntax(no, "expected `:` after array header"))?
        .trim();
    Ok(Header {
        len,
        fields,
        inline,
    })
}

fn decode_array_body(
    header: &Header<'_>,
    no: usize,
    depth: usize,
    cur: &mut Cursor<'_>,
) -> Result<Value, ToonError> {
    if let Some(fields) = &header.fields {
        let mut rows = Vec::with_capacity(header.len);
        while let Some(line) = cur.at_depth(depth + 1) {
            cur.advance();
            let cells = split_delimited(line.text);
            if cells.len() != fields.len() {
                return Err(syntax(
                    line.no,
                    format!("row has {} values, header has {}", cells.len(), fields.len()),
                ));
            }
            let mut obj = Map::new();
            for (field, cell) in fields.iter().zip(cells) {
                obj.insert(field.clone(), parse_primitive(cell.trim(), line.no)?);
            }
            rows.push(Value::Object(obj));
        }
        return check_len(rows, header.len, no);
    }

    if !header.inline.is_empty() {
        let values = split_delimited(header.inline)
            .into_iter()
            .map(|cell| parse_primitive(cell.trim(), no))
            .collect::<Result<Vec<_>, _>>()?;
        return check_len(values, header.len, no);
    }

    let mut items = Vec::with_capacity(header.len);
    while let Some(line) = cur.at_depth(depth + 1) {
        let content = if line.text == "-" {
            ""
        } else if let Some(c) = line.text.strip_prefix("- ") {
            c.trim()
        } else {
            break;
        };
        cur.advance();
        items.push(decode_list_item(content, line.no, depth + 1, cur)?);
    }
    check_len(items, header.len, no)
}

/// A list item's content sits one level deeper than its hyphen.
fn decode_list_item(
    content: &str,
    no: usize,
    hyphen_depth: usize,
    cur: &mut Cursor<'_>,
) -> Result<Value, ToonError> {
    let depth = hyphen_depth + 1;
    if content.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if content.starts_with('[') {
        let header = parse_header(content, no)?;
        return decode_array_body(&header, no, depth, cur);
    }
    if split_key(content).is_some() {
        let (key, value) = decode_field(content, no, depth, cur)?;
        let mut map = Map::new();
        map.insert(key, value);
        for (k, v) in decode_object(cur, depth)? {
            map.insert(k, v);
        }
        return Ok(Value::Object(map));
    }
    parse_primitive(content, no)
}

fn check_len(items: Vec<Value>, expected: usize, no: usize) -> Result<Value, ToonError> {
    if items.len() != expected {
        return Err(ToonError::LengthMismatch {
            line: no,
            expected,
            found: items.len(),
        });
    }
    Ok(Value::Array(items))
}

/// Splits `key` from the remainder (which starts at `:` or `[`). Returns
/// `None` when the text is not a field.
fn split_key(text: &str) -> Option<(String, &str)> {
    if text.starts_with('"') {
        let (key, consumed) = parse_quoted(text).ok()?;
        let rest = &text[consumed..];
        return (rest.starts_with(':') || rest.starts_with('[')).then_some((key, rest));
    }
    let end = text.find([':', '['])?;
    let key = text[..end].trim();
    if key.is_empty() || !is_bare_key(key) {
        return None;
    }
    Some((key.to_string(), &text[end..]))
}

fn parse_key_token(token: &str, no: usize) -> Result<String, ToonError> {
    if token.starts_with('"') {
        let (key, consumed) = parse_quoted(token).map_err(|m| syntax(no, m))?;
        if consumed != token.len() {
            return Err(syntax(no, "trailing characters after quoted key"));
        }
        return Ok(key);
    }
    if !is_bare_key(token) {
        return Err(syntax(no, format!("invalid field name `{token}`")));
    }
    Ok(token.to_string())
}

fn parse_primitive(token: &str, no: usize) -> Result<Value, ToonError> {
    if token.starts_with('"') {
        let (s, consumed) = parse_quoted(token).map_err(|m| syntax(no, m))?;
        if consumed != token.len() {
            return Err(syntax(no, "trailing characters after quoted string"));
        }
        return Ok(Value::String(s));
    }
    match token {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if looks_numeric(token) {
        let n: Number = serde_json::from_str(token)
            .map_err(|e| syntax(no, format!("invalid number `{token}`: {e}")))?;
        return Ok(Value::Number(n));
    }
    Ok(Value::String(token.to_string()))
}

/// Parses a leading quoted string; returns it and the bytes consumed.
fn parse_quoted(text: &str) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut chars = text.char_indices();
    if !matches!(chars.next(), Some((_, '"'))) {
        return Err("expected `\"`".into());
    }
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, i + 1)),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, 'n')) => out.push('\n'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'u')) => {
                    let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| format!("invalid unicode escape `\\u{hex}`"))?;
                    out.push(code);
                }
                Some((_, other)) => return Err(format!("invalid escape `\\{other}`")),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated string".into())
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_delimited(text: &str) -> Vec<&str> {
    let mut cells = Vec::new();
    let mut rest = text;
    while let Some(i) = find_unquoted(rest, DELIMITER) {
        cells.push(&rest[..i]);
        rest = &rest[i + DELIMITER.len_utf8()..];
    }
    cells.push(rest);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uniform_objects_become_a_table() {
        let v = json!({
            "rows": [
                {"ip": "10.0.0.1", "port": 22, "service": "ssh"},
                {"ip": "10.0.0.1", "port": 80, "service": null},
            ]
        });
        assert_eq!(
            encode(&v),
            "rows[2]{ip,port,service}:\n  10.0.0.1,22,ssh\n  10.0.0.1,80,null"
        );
    }

    #[test]
    fn nested_objects_are_indented() {
        let v = json!({"summary": {"total_hosts": 1, "hosts_with_open_ports": 1}});
        assert_eq!(
            encode(&v),
            "summary:\n  total_hosts: 1\n  hosts_with_open_ports: 1"
        );
    }

    #[test]
    fn ambiguous_strings_are_quoted() {
        assert_eq!(encode_string("null"), "\"null\"");
        assert_eq!(encode_string("8.9"), "\"8.9\"");
        assert_eq!(encode_string("007"), "\"007\"");
        assert_eq!(encode_string("a,b"), "\"a,b\"");
        assert_eq!(encode_string(""), "\"\"");
        assert_eq!(encode_string(" padded"), "\" padded\"");
        assert_eq!(encode_string("OpenSSH 8.9p1 Ubuntu"), "OpenSSH 8.9p1 Ubuntu");
        assert_eq!(encode_string("192.0.2.10"), "192.0.2.10");
    }

    #[test]
    fn numeric_detection_follows_json_grammar() {
        for s in ["0", "-1", "22", "3.14", "1e5", "-2.5E-3"] {
            assert!(looks_numeric(s), "{s}");
        }
        for s in ["", "-", "01x", "1.", ".5", "1e", "inf", "NaN", "8.9p1"] {
            assert!(!looks_numeric(s), "{s}");
        }
    }

    #[test]
    fn quoted_cells_may_contain_delimiters() {
        assert_eq!(split_delimited(r#"a,"b,c",d"#), vec!["a", "\"b,c\"", "d"]);
    }

    #[test]
    fn empty_document_is_an_empty_object() {
        assert_eq!(decode("").unwrap(), json!({}));
        assert_eq!(encode(&json!({})), "");
    }

    #[test]
    fn row_count_mismatch_is_reported() {
        let err = decode("rows[3]{a,b}:\n  1,2\n  3,4").unwrap_err();
        assert_eq!(
            err,
            ToonError::LengthMismatch {
                line: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(decode("rows[1]{a,b}:\n  1,2,3").is_err());
    }
}
