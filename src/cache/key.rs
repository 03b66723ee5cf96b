//! Cache-key derivation: a BLAKE3 digest over a canonical byte sequence.
//!
//! The key covers the cell body, the bodies of its transitive dependencies
//! in deterministic order, the environment and parameter mappings in
//! canonical sorted-key JSON, and the runner version. Permuting mapping key
//! order in the source never changes the key.

use crate::core::model::Notebook;
use crate::core::resolver;

const KEY_PREFIX: &[u8] = b"woofnb-cache-v1\0";

/// Runner version component: `WOOF_RUNNER_VERSION` pins it for
/// reproducibility testing, otherwise the crate version.
pub fn runner_version() -> String {
    runner_version_from(std::env::var("WOOF_RUNNER_VERSION").ok())
}

fn runner_version_from(pinned: Option<String>) -> String {
    pinned
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

/// Compute the content-hash key for one cell, lowercase hex.
pub fn cache_key(nb: &Notebook, cell_idx: usize, runner_version: &str) -> String {
    let cell = &nb.cells[cell_idx];
    let mut hasher = blake3::Hasher::new();

    hasher.update(KEY_PREFIX);
    hasher.update(runner_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(cell.cell_type.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(cell.effective_lang(&nb.header).as_bytes());
    hasher.update(b"\0");
    hasher.update(cell.body.as_bytes());
    hasher.update(b"\0");

    for dep in resolver::transitive_deps_ordered(nb, cell_idx) {
        hasher.update(nb.cells[dep].id.as_bytes());
        hasher.update(b"\0");
        hasher.update(nb.cells[dep].body.as_bytes());
        hasher.update(b"\0");
    }

    hasher.update(canonical_yaml_json(nb.header.env.as_ref()).as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_yaml_json(nb.header.parameters.as_ref()).as_bytes());

    hasher.finalize().to_hex().to_string()
}

/// Canonical JSON rendering of a YAML value: object keys sorted recursively,
/// no insignificant whitespace, absent values as `null`.
pub fn canonical_yaml_json(value: Option<&serde_yaml_ng::Value>) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: Option<&serde_yaml_ng::Value>, out: &mut String) {
    use serde_yaml_ng::Value;
    match value {
        None | Some(Value::Null) => out.push_str("null"),
        Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
        Some(Value::Number(n)) => out.push_str(&n.to_string()),
        Some(Value::String(s)) => {
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()))
        }
        Some(Value::Sequence(items)) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(Some(item), out);
            }
            out.push(']');
        }
        Some(Value::Mapping(map)) => {
            let mut entries: Vec<(String, &Value)> =
                map.iter().map(|(k, v)| (scalar_key(k), v)).collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string()));
                out.push(':');
                write_canonical(Some(v), out);
            }
            out.push('}');
        }
        Some(Value::Tagged(tagged)) => write_canonical(Some(&tagged.value), out),
    }
}

fn scalar_key(k: &serde_yaml_ng::Value) -> String {
    use serde_yaml_ng::Value;
    match k {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml_ng::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}
