//! Line-oriented notebook parsing.
//!
//! Finds the `%WOOFNB` magic line, preserves the header text verbatim,
//! builds the typed header view through the YAML collaborator, and tokenizes
//! each ```` ```cell ```` fence into a typed [`Cell`]. All failures carry a
//! stable kind and the 1-based source line.

use super::model::{Cell, CellType, Header, Notebook, SideFx};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &str = "%WOOFNB";
const FENCE_OPEN: &str = "```cell";
const FENCE_CLOSE: &str = "```";

/// Stable parse failure identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    MissingMagic,
    UnsupportedVersion,
    UnterminatedCell,
    DuplicateToken,
    BadTokenSyntax,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingMagic => "MissingMagic",
            Self::UnsupportedVersion => "UnsupportedVersion",
            Self::UnterminatedCell => "UnterminatedCell",
            Self::DuplicateToken => "DuplicateToken",
            Self::BadTokenSyntax => "BadTokenSyntax",
        };
        write!(f, "{}", s)
    }
}

/// A positioned parse failure.
#[derive(Debug, Clone, Error)]
#[error("{kind} at line {line}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// 1-based source line.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(kind: ParseErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            message: message.into(),
        }
    }
}

/// Parse a notebook from a file on disk.
pub fn parse_file(path: &Path) -> Result<Notebook, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_text(&text, Some(path.to_path_buf())).map_err(|e| e.to_string())
}

/// Parse a notebook from source text.
pub fn parse_text(text: &str, path: Option<PathBuf>) -> Result<Notebook, ParseError> {
    let lines: Vec<&str> = text.lines().collect();

    // Magic line: first non-blank line, trimmed, must begin with %WOOFNB.
    let mut idx = 0;
    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    if idx >= lines.len() || !lines[idx].trim().starts_with(MAGIC) {
        return Err(ParseError::new(
            ParseErrorKind::MissingMagic,
            idx + 1,
            "expected a '%WOOFNB <major>.<minor>' magic line",
        ));
    }
    let magic_version = parse_version(lines[idx].trim(), idx + 1)?;

    // Header block: magic line through the line before the first cell fence.
    let mut header_lines = vec![lines[idx]];
    idx += 1;
    while idx < lines.len() && !is_fence_open(lines[idx]) {
        header_lines.push(lines[idx]);
        idx += 1;
    }
    let header_text = format!("{}\n", header_lines.join("\n"));
    let header = header_view(&header_lines[1..]);

    // Cells.
    let mut cells = Vec::new();
    while idx < lines.len() {
        if !is_fence_open(lines[idx]) {
            // Stray content between fences (typically blank lines) is
            // tolerated but not preserved.
            idx += 1;
            continue;
        }
        let fence_line = idx + 1;
        let raw = &lines[idx].trim_start()[FENCE_OPEN.len()..];
        let cell = build_cell(raw, fence_line)?;

        idx += 1;
        let body_start = idx;
        while idx < lines.len() && lines[idx].trim() != FENCE_CLOSE {
            idx += 1;
        }
        if idx >= lines.len() {
            return Err(ParseError::new(
                ParseErrorKind::UnterminatedCell,
                fence_line,
                format!("cell '{}' has no closing fence", cell.id),
            ));
        }
        let body = if idx == body_start {
            String::new()
        } else {
            format!("{}\n", lines[body_start..idx].join("\n"))
        };
        idx += 1;

        cells.push(Cell { body, ..cell });
    }

    Ok(Notebook {
        header_text,
        header,
        magic_version,
        cells,
        path,
    })
}

/// A fence line's left-trimmed content is ```` ```cell ```` exactly, or
/// ```` ```cell ```` followed by whitespace and tokens.
fn is_fence_open(line: &str) -> bool {
    let t = line.trim_start();
    match t.strip_prefix(FENCE_OPEN) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Extract and check the version token from the magic line.
fn parse_version(magic: &str, line: usize) -> Result<String, ParseError> {
    let rest = magic[MAGIC.len()..].trim();
    if rest.is_empty() {
        return Err(ParseError::new(
            ParseErrorKind::UnsupportedVersion,
            line,
            "magic line has no version token",
        ));
    }
    let major = rest.split('.').next().unwrap_or("");
    if major != "1" {
        return Err(ParseError::new(
            ParseErrorKind::UnsupportedVersion,
            line,
            format!("unsupported major version '{}'", rest),
        ));
    }
    Ok(rest.to_string())
}

/// Typed header view over the header text minus the magic line. YAML that
/// does not form a recognizable mapping degrades to an empty view; the
/// linter reports the missing required keys.
fn header_view(yaml_lines: &[&str]) -> Header {
    let yaml = yaml_lines.join("\n");
    if yaml.trim().is_empty() {
        return Header::default();
    }
    serde_yaml_ng::from_str(&yaml).unwrap_or_default()
}

// ============================================================================
// Cell-header tokenizer
// ============================================================================

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_bare_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ',' | ':' | '/' | '@' | '-')
}

/// Tokenize `key[=value]` pairs separated by ASCII whitespace. A key with no
/// `=` yields the value "true". Values are bare (`[A-Za-z0-9_.,:/@-]+`) or
/// double-quoted with `\"` and `\\` escapes; any other backslash escape is
/// preserved literally.
pub fn tokenize(raw: &str, line: usize) -> Result<Vec<(String, String)>, ParseError> {
    let chars: Vec<char> = raw.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut out: Vec<(String, String)> = Vec::new();

    while i < n {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }

        let key_start = i;
        while i < n && is_key_char(chars[i]) {
            i += 1;
        }
        if i == key_start {
            return Err(ParseError::new(
                ParseErrorKind::BadTokenSyntax,
                line,
                format!("unexpected character '{}' in cell header", chars[i]),
            ));
        }
        let key: String = chars[key_start..i].iter().collect();
        if out.iter().any(|(k, _)| *k == key) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateToken,
                line,
                format!("duplicate token '{}'", key),
            ));
        }

        if i >= n || chars[i].is_whitespace() {
            // Bare flag.
            out.push((key, "true".to_string()));
            continue;
        }
        if chars[i] != '=' {
            return Err(ParseError::new(
                ParseErrorKind::BadTokenSyntax,
                line,
                format!("expected '=' or whitespace after key '{}'", key),
            ));
        }
        i += 1;

        let value = if i < n && chars[i] == '"' {
            i += 1;
            let mut buf = String::new();
            let mut closed = false;
            while i < n {
                match chars[i] {
                    '\\' if i + 1 < n && (chars[i + 1] == '"' || chars[i + 1] == '\\') => {
                        buf.push(chars[i + 1]);
                        i += 2;
                    }
                    '"' => {
                        i += 1;
                        closed = true;
                        break;
                    }
                    c => {
                        buf.push(c);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(ParseError::new(
                    ParseErrorKind::BadTokenSyntax,
                    line,
                    format!("unterminated quoted value for '{}'", key),
                ));
            }
            if i < n && !chars[i].is_whitespace() {
                return Err(ParseError::new(
                    ParseErrorKind::BadTokenSyntax,
                    line,
                    format!("trailing characters after quoted value for '{}'", key),
                ));
            }
            buf
        } else {
            let v_start = i;
            while i < n && !chars[i].is_whitespace() {
                if !is_bare_value_char(chars[i]) {
                    return Err(ParseError::new(
                        ParseErrorKind::BadTokenSyntax,
                        line,
                        format!(
                            "invalid character '{}' in bare value for '{}'",
                            chars[i], key
                        ),
                    ));
                }
                i += 1;
            }
            if i == v_start {
                return Err(ParseError::new(
                    ParseErrorKind::BadTokenSyntax,
                    line,
                    format!("empty value for '{}'", key),
                ));
            }
            chars[v_start..i].iter().collect()
        };

        out.push((key, value));
    }

    Ok(out)
}

/// Split a multi-value token on commas, dropping empty segments.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Build a typed cell from the raw token substring of the fence line.
fn build_cell(raw: &str, line: usize) -> Result<Cell, ParseError> {
    let tokens = tokenize(raw, line)?;
    let mut cell = Cell {
        header_tokens_raw: raw.to_string(),
        ..Cell::default()
    };

    let bad = |key: &str, value: &str| {
        ParseError::new(
            ParseErrorKind::BadTokenSyntax,
            line,
            format!("invalid value '{}' for '{}'", value, key),
        )
    };

    for (key, value) in tokens {
        match key.as_str() {
            "id" => cell.id = value,
            "type" => {
                cell.cell_type =
                    CellType::parse(&value).ok_or_else(|| bad("type", &value))?;
            }
            "name" => cell.name = Some(value),
            "lang" => cell.lang = Some(value),
            "deps" => cell.deps = split_list(&value),
            "tags" => cell.tags = split_list(&value),
            "sidefx" => {
                cell.sidefx =
                    Some(SideFx::parse(&value).ok_or_else(|| bad("sidefx", &value))?);
            }
            "timeout" => {
                cell.timeout_sec = Some(value.parse().map_err(|_| bad("timeout", &value))?);
            }
            "memory_mb" => {
                cell.memory_mb = Some(value.parse().map_err(|_| bad("memory_mb", &value))?);
            }
            "retries" => {
                cell.retries = Some(value.parse().map_err(|_| bad("retries", &value))?);
            }
            "priority" => {
                cell.priority = Some(value.parse().map_err(|_| bad("priority", &value))?);
            }
            "disabled" => {
                cell.disabled =
                    Some(parse_bool(&value).ok_or_else(|| bad("disabled", &value))?);
            }
            _ => {
                cell.extra.insert(key, value);
            }
        }
    }

    Ok(cell)
}
