//! Typed entities shared by every subsystem: Notebook, Header, Cell,
//! Output, CacheEntry, and the per-cell execution statuses.
//!
//! The header keeps two representations at once: the verbatim source text
//! (byte-preserving, so non-format operations round-trip exactly) and the
//! typed view below. Unknown header keys survive in the verbatim text and
//! are re-emitted by the formatter; the typed view simply ignores them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Notebook
// ============================================================================

/// A parsed notebook: verbatim header text, typed header view, and cells
/// in file order.
#[derive(Debug, Clone)]
pub struct Notebook {
    /// Header text starting at the `%WOOFNB` magic line, preserved verbatim.
    pub header_text: String,
    /// Typed view of the YAML header (magic line excluded).
    pub header: Header,
    /// Version token from the magic line, e.g. "1.0".
    pub magic_version: String,
    pub cells: Vec<Cell>,
    /// Source file, when parsed from disk.
    pub path: Option<PathBuf>,
}

impl Notebook {
    /// Map cell id → index in `cells`.
    pub fn index_by_id(&self) -> HashMap<&str, usize> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect()
    }

    /// File stem used for the cache subtree, falling back to "notebook"
    /// for in-memory notebooks.
    pub fn stem(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "notebook".to_string())
    }
}

// ============================================================================
// Header
// ============================================================================

/// Typed view of recognized header keys. Everything else is passthrough.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: Option<String>,

    /// Default cell language for `code`/`test` cells.
    #[serde(default)]
    pub language: Option<String>,

    /// Environment description. Opaque to the core apart from cache hashing.
    #[serde(default)]
    pub env: Option<serde_yaml_ng::Value>,

    /// Opaque parameter mapping, used only for cache hashing.
    #[serde(default)]
    pub parameters: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub execution: Execution,

    #[serde(default)]
    pub io_policy: IoPolicy,
}

/// Per-notebook execution defaults, overridable per cell.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

/// Scheduling and caching selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub order: ExecOrder,
    #[serde(default)]
    pub cache: CacheMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecOrder {
    #[default]
    Linear,
    Graph,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CacheMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "content-hash")]
    ContentHash,
}

/// Default-deny capability allow-list.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct IoPolicy {
    #[serde(default)]
    pub allow_files: bool,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub allow_shell: bool,
}

// ============================================================================
// Cells
// ============================================================================

/// Cell type enum. `md`, `viz`, and `raw` are never executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Md,
    Data,
    Test,
    Viz,
    Bash,
    Raw,
}

impl CellType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "md" => Some(Self::Md),
            "data" => Some(Self::Data),
            "test" => Some(Self::Test),
            "viz" => Some(Self::Viz),
            "bash" => Some(Self::Bash),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn is_executable(&self) -> bool {
        !matches!(self, Self::Md | Self::Viz | Self::Raw)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::Md => "md",
            Self::Data => "data",
            Self::Test => "test",
            Self::Viz => "viz",
            Self::Bash => "bash",
            Self::Raw => "raw",
        };
        write!(f, "{}", s)
    }
}

/// Declared side-effect intent. A capability is granted only when the header
/// allow-flag and this declaration agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SideFx {
    #[default]
    None,
    Fs,
    Net,
    Shell,
    Isolated,
}

impl SideFx {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "fs" => Some(Self::Fs),
            "net" => Some(Self::Net),
            "shell" => Some(Self::Shell),
            "isolated" => Some(Self::Isolated),
            _ => None,
        }
    }
}

impl fmt::Display for SideFx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Fs => "fs",
            Self::Net => "net",
            Self::Shell => "shell",
            Self::Isolated => "isolated",
        };
        write!(f, "{}", s)
    }
}

/// One fenced cell. Optional fields record whether the token was present in
/// the source, so the formatter regenerates exactly the declared tokens.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub id: String,
    pub cell_type: CellType,
    pub name: Option<String>,
    /// Per-cell language override.
    pub lang: Option<String>,
    pub deps: Vec<String>,
    pub tags: Vec<String>,
    pub sidefx: Option<SideFx>,
    pub timeout_sec: Option<u64>,
    pub memory_mb: Option<u64>,
    pub retries: Option<u32>,
    pub priority: Option<i64>,
    pub disabled: Option<bool>,
    /// Cell text. Non-empty bodies end with a newline.
    pub body: String,
    /// Exact substring after ```` ```cell ```` on the fence line, kept for
    /// lossless re-emit.
    pub header_tokens_raw: String,
    /// Unrecognized tokens, in source order.
    pub extra: IndexMap<String, String>,
}

impl Default for CellType {
    fn default() -> Self {
        Self::Raw
    }
}

impl Cell {
    pub fn sidefx(&self) -> SideFx {
        self.sidefx.unwrap_or_default()
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(0)
    }

    pub fn priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }

    /// Language this cell executes under: cell override, then notebook
    /// default, then "python".
    pub fn effective_lang(&self, header: &Header) -> String {
        self.lang
            .clone()
            .or_else(|| header.language.clone())
            .unwrap_or_else(|| "python".to_string())
    }

    /// Cell timeout, falling back to the notebook default.
    pub fn effective_timeout(&self, header: &Header) -> Option<u64> {
        self.timeout_sec.or(header.defaults.timeout_sec)
    }
}

/// Valid cell-id characters: `[A-Za-z0-9._-]`.
pub fn is_valid_cell_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Captured cell output, tagged the way it lands in the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: StreamName,
        text: String,
    },
    DisplayData {
        data: IndexMap<String, serde_json::Value>,
    },
    ExecuteResult {
        repr: String,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Output {
    pub fn stream(name: StreamName, text: impl Into<String>) -> Self {
        Self::Stream {
            name,
            text: text.into(),
        }
    }

    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

// ============================================================================
// Execution statuses
// ============================================================================

/// Terminal state of one cell within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED-DETERMINISTIC")]
    FailedDeterministic,
    #[serde(rename = "FAILED-EXHAUSTED")]
    FailedExhausted,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "REPLAYED")]
    Replayed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl CellStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success | Self::Replayed)
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::FailedDeterministic => "FAILED-DETERMINISTIC",
            Self::FailedExhausted => "FAILED-EXHAUSTED",
            Self::Blocked => "BLOCKED",
            Self::Replayed => "REPLAYED",
            Self::Skipped => "SKIPPED",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Cache entries and sidecar records
// ============================================================================

/// One cached execution, stored as `.woof-cache/<stem>/<cell-id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-hash key, lowercase hex.
    pub key: String,
    pub cell_id: String,
    pub outputs: Vec<Output>,
    pub elapsed_ms: u64,
    pub runner_version: String,
}

/// One line of the `<notebook>.woofnb.out` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub cell: String,
    /// RFC 3339 timestamp taken when the cell started.
    pub timestamp: String,
    pub elapsed_ms: u64,
    pub status: CellStatus,
    pub outputs: Vec<Output>,
}
