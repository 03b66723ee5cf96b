//! Serialization back to source text, plus the canonical formatter.
//!
//! `serialize` is lossless: it re-emits the preserved header text and each
//! cell's preserved fence tokens, so `serialize(parse(x)) == x` for valid
//! sources. `format_text` additionally rewrites the header into canonical
//! key order through the YAML collaborator and regenerates fence tokens in
//! canonical order; formatting is idempotent byte-for-byte.

use super::model::{Cell, Notebook};
use super::parser::{self, ParseError};
use serde_yaml_ng::{Mapping, Value};

/// Canonical fence-token order. Unrecognized tokens follow, lexicographic.
const CANON_TOKEN_ORDER: &[&str] = &[
    "id", "type", "name", "lang", "deps", "tags", "sidefx", "timeout", "memory_mb", "retries",
    "priority", "disabled",
];

/// Canonical top-level header key order. Other keys follow, lexicographic.
const CANON_HEADER_ORDER: &[&str] = &[
    "name",
    "language",
    "env",
    "parameters",
    "defaults",
    "execution",
    "io_policy",
    "tags",
    "version",
    "provenance",
    "metadata",
];

const CANON_ENV_ORDER: &[&str] = &["interpreter_version", "requirements", "container"];

/// Emit a notebook as source text, byte-preserving for unformatted input.
pub fn serialize(nb: &Notebook) -> String {
    let mut out = String::with_capacity(nb.header_text.len() + 256);
    out.push_str(&nb.header_text);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    for cell in &nb.cells {
        out.push_str("```cell");
        out.push_str(&cell.header_tokens_raw);
        out.push('\n');
        if !cell.body.is_empty() {
            out.push_str(&cell.body);
            if !cell.body.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push_str("```\n");
    }
    out
}

/// Rewrite a notebook in place into canonical form: header keys reordered,
/// fence tokens regenerated.
pub fn format_notebook(nb: &mut Notebook) {
    nb.header_text = format_header_text(&nb.header_text);
    for cell in &mut nb.cells {
        cell.header_tokens_raw = format!(" {}", canonical_tokens(cell));
    }
}

/// Parse, canonicalize, and re-emit source text.
pub fn format_text(text: &str) -> Result<String, ParseError> {
    let mut nb = parser::parse_text(text, None)?;
    format_notebook(&mut nb);
    Ok(serialize(&nb))
}

// ============================================================================
// Header formatting
// ============================================================================

/// Reorder the header's YAML mapping into canonical key order, keeping the
/// magic line first. Headers that are not YAML mappings are left alone.
pub fn format_header_text(header_text: &str) -> String {
    let lines: Vec<&str> = header_text.lines().collect();
    let mut idx = 0;
    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    if idx >= lines.len() || !lines[idx].trim().starts_with("%WOOFNB") {
        return header_text.to_string();
    }
    let magic = lines[idx].trim();
    let yaml_body = lines[idx + 1..].join("\n");

    if yaml_body.trim().is_empty() {
        return format!("{}\n", magic);
    }

    let parsed: Result<Value, _> = serde_yaml_ng::from_str(&yaml_body);
    let mapping = match parsed {
        Ok(Value::Mapping(m)) => m,
        _ => return format!("{}\n{}", magic, ensure_newline(&yaml_body)),
    };

    let mut reordered = reorder_mapping(mapping, CANON_HEADER_ORDER);
    let env_key = Value::String("env".to_string());
    if let Some(env) = reordered.get_mut(&env_key) {
        if let Value::Mapping(m) = env {
            *env = Value::Mapping(reorder_mapping(std::mem::take(m), CANON_ENV_ORDER));
        }
    }

    match serde_yaml_ng::to_string(&Value::Mapping(reordered)) {
        Ok(rendered) => format!("{}\n{}", magic, ensure_newline(&rendered)),
        Err(_) => format!("{}\n{}", magic, ensure_newline(&yaml_body)),
    }
}

fn ensure_newline(s: &str) -> String {
    if s.ends_with('\n') {
        s.to_string()
    } else {
        format!("{}\n", s)
    }
}

/// Known keys first in the given order, then the rest sorted lexicographically
/// by their scalar rendering.
fn reorder_mapping(map: Mapping, order: &[&str]) -> Mapping {
    let mut rest: Vec<(Value, Value)> = Vec::new();
    let mut known: Vec<(usize, Value, Value)> = Vec::new();

    for (k, v) in map {
        match k.as_str().and_then(|s| order.iter().position(|o| *o == s)) {
            Some(pos) => known.push((pos, k, v)),
            None => rest.push((k, v)),
        }
    }
    known.sort_by_key(|(pos, _, _)| *pos);
    rest.sort_by(|(a, _), (b, _)| key_string(a).cmp(&key_string(b)));

    let mut out = Mapping::new();
    for (_, k, v) in known {
        out.insert(k, v);
    }
    for (k, v) in rest {
        out.insert(k, v);
    }
    out
}

fn key_string(k: &Value) -> String {
    match k {
        Value::String(s) => s.clone(),
        other => serde_yaml_ng::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

// ============================================================================
// Fence-token formatting
// ============================================================================

/// Regenerate a cell's fence tokens in canonical order, emitting only the
/// tokens that were declared in the source.
pub fn canonical_tokens(cell: &Cell) -> String {
    let mut pairs: Vec<(&str, String)> = Vec::new();

    for key in CANON_TOKEN_ORDER {
        match *key {
            "id" => pairs.push(("id", cell.id.clone())),
            "type" => pairs.push(("type", cell.cell_type.to_string())),
            "name" => {
                if let Some(ref v) = cell.name {
                    pairs.push(("name", v.clone()));
                }
            }
            "lang" => {
                if let Some(ref v) = cell.lang {
                    pairs.push(("lang", v.clone()));
                }
            }
            "deps" => {
                if !cell.deps.is_empty() {
                    pairs.push(("deps", cell.deps.join(",")));
                }
            }
            "tags" => {
                if !cell.tags.is_empty() {
                    pairs.push(("tags", cell.tags.join(",")));
                }
            }
            "sidefx" => {
                if let Some(v) = cell.sidefx {
                    pairs.push(("sidefx", v.to_string()));
                }
            }
            "timeout" => {
                if let Some(v) = cell.timeout_sec {
                    pairs.push(("timeout", v.to_string()));
                }
            }
            "memory_mb" => {
                if let Some(v) = cell.memory_mb {
                    pairs.push(("memory_mb", v.to_string()));
                }
            }
            "retries" => {
                if let Some(v) = cell.retries {
                    pairs.push(("retries", v.to_string()));
                }
            }
            "priority" => {
                if let Some(v) = cell.priority {
                    pairs.push(("priority", v.to_string()));
                }
            }
            "disabled" => {
                if let Some(v) = cell.disabled {
                    pairs.push(("disabled", v.to_string()));
                }
            }
            _ => unreachable!(),
        }
    }

    let mut extra: Vec<(&str, String)> = cell
        .extra
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    extra.sort_by(|(a, _), (b, _)| a.cmp(b));
    pairs.extend(extra);

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, emit_value(v)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_bare(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ',' | ':' | '/' | '@' | '-'))
}

/// Bare when possible, otherwise double-quoted with `"` and `\` escaped.
fn emit_value(value: &str) -> String {
    if is_bare(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_text;

    #[test]
    fn test_roundtrip_byte_exact() {
        let src = "%WOOFNB 1.0\nname: rt\nlanguage: python\n```cell id=a type=code\nx=1\n```\n";
        let nb = parse_text(src, None).unwrap();
        assert_eq!(serialize(&nb), src);
    }

    #[test]
    fn test_roundtrip_empty_body() {
        let src = "%WOOFNB 1.0\nname: rt\nlanguage: python\n```cell id=a type=code\n```\n";
        let nb = parse_text(src, None).unwrap();
        assert_eq!(serialize(&nb), src);
    }

    #[test]
    fn test_roundtrip_multi_cell_and_blank_lines_in_body() {
        let src = "%WOOFNB 1.0\nname: rt\nlanguage: python\n\
```cell id=a type=code\nx=1\n\ny=2\n```\n\
```cell id=b type=md\n# notes\n```\n";
        let nb = parse_text(src, None).unwrap();
        assert_eq!(serialize(&nb), src);
    }

    #[test]
    fn test_roundtrip_preserves_token_spacing() {
        let src = "%WOOFNB 1.0\nname: rt\nlanguage: python\n```cell   id=a  type=code\nx=1\n```\n";
        let nb = parse_text(src, None).unwrap();
        assert_eq!(serialize(&nb), src);
    }

    #[test]
    fn test_format_idempotent() {
        let src = "%WOOFNB 1.0\nlanguage: python\nname: demo\ncustom: 1\n\
```cell type=code id=a retries=1 deps=b name=\"my cell\"\nx=1\n```\n\
```cell id=b type=data\n[1, 2]\n```\n";
        let once = format_text(src).unwrap();
        let twice = format_text(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_format_reorders_header_keys() {
        let src = "%WOOFNB 1.0\nversion: 2\nlanguage: python\nname: demo\n";
        let out = format_text(src).unwrap();
        let name_pos = out.find("name:").unwrap();
        let lang_pos = out.find("language:").unwrap();
        let version_pos = out.find("version:").unwrap();
        assert!(name_pos < lang_pos);
        assert!(lang_pos < version_pos);
    }

    #[test]
    fn test_format_unknown_header_keys_after_known_sorted() {
        let src = "%WOOFNB 1.0\nzebra: 1\nalpha: 2\nname: demo\nlanguage: python\n";
        let out = format_text(src).unwrap();
        let alpha = out.find("alpha:").unwrap();
        let zebra = out.find("zebra:").unwrap();
        assert!(out.find("language:").unwrap() < alpha);
        assert!(alpha < zebra);
    }

    #[test]
    fn test_format_env_subkey_order() {
        let src = "%WOOFNB 1.0\nname: d\nlanguage: python\nenv:\n  container:\n    image: base\n  interpreter_version: \"3.12\"\n";
        let out = format_text(src).unwrap();
        let iv = out.find("interpreter_version").unwrap();
        let ct = out.find("container").unwrap();
        assert!(iv < ct);
    }

    #[test]
    fn test_format_canonical_token_order() {
        let src = "%WOOFNB 1.0\nname: d\nlanguage: python\n\
```cell retries=2 type=code zcustom=1 id=a deps=b acustom=2\nx=1\n```\n\
```cell id=b type=data\n1\n```\n";
        let out = format_text(src).unwrap();
        assert!(out.contains("```cell id=a type=code deps=b retries=2 acustom=2 zcustom=1\n"));
    }

    #[test]
    fn test_format_quotes_embedded_space() {
        let src = "%WOOFNB 1.0\nname: d\nlanguage: python\n```cell id=a type=code name=\"my cell\"\nx=1\n```\n";
        let out = format_text(src).unwrap();
        assert!(out.contains("name=\"my cell\""));
        // Quoted value survives a second parse/format cycle.
        let nb = parse_text(&out, None).unwrap();
        assert_eq!(nb.cells[0].name.as_deref(), Some("my cell"));
        assert_eq!(format_text(&out).unwrap(), out);
    }

    #[test]
    fn test_format_escapes_quotes_and_backslashes() {
        let mut cell = crate::core::model::Cell {
            id: "a".to_string(),
            name: Some("say \"hi\" \\ there".to_string()),
            ..Default::default()
        };
        cell.cell_type = crate::core::model::CellType::Code;
        let toks = canonical_tokens(&cell);
        assert_eq!(toks, r#"id=a type=code name="say \"hi\" \\ there""#);
    }

    #[test]
    fn test_format_header_without_yaml_body() {
        assert_eq!(format_header_text("%WOOFNB 1.0\n"), "%WOOFNB 1.0\n");
    }

    #[test]
    fn test_serialize_adds_missing_header_newline() {
        let src = "%WOOFNB 1.0\nname: rt\nlanguage: python\n```cell id=a type=code\nx=1\n```\n";
        let mut nb = parse_text(src, None).unwrap();
        nb.header_text.pop();
        assert_eq!(serialize(&nb), src);
    }

    #[test]
    fn test_emit_value_bare_set() {
        assert_eq!(emit_value("a,b:c/d@e-f_g.h"), "a,b:c/d@e-f_g.h");
        assert_eq!(emit_value(""), "\"\"");
        assert_eq!(emit_value("two words"), "\"two words\"");
    }
}
