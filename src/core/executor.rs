//! Orchestration loop for `run`/`test`.
//!
//! Drives lint → plan → per cell: policy gate → cache lookup → backend →
//! cache store → sidecar. A failure under linear order stops the remaining
//! cells; under graph order it blocks descendants while siblings proceed.
//! Cache writes always land after their sidecar record.

use super::lint;
use super::model::{CacheEntry, CacheMode, CellStatus, CellType, ExecOrder, Notebook, Output, SideFx, SidecarRecord};
use super::planner::{self, PlanOptions};
use super::policy;
use super::resolver;
use crate::cache;
use crate::runner::{Attempt, FailureClass, Runner, CLOSE_GRACE};
use crate::sidecar;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Per-run inputs beyond the notebook itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub select: Vec<String>,
    pub no_deps: bool,
    pub tests_only: bool,
    /// Sidecar destination override, for embedding and tests.
    pub sidecar_path: Option<PathBuf>,
    /// Cooperative cancel: once set, no further cells start.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Terminal statuses per planned cell, in execution order.
#[derive(Debug)]
pub struct RunSummary {
    pub statuses: IndexMap<String, CellStatus>,
    pub sidecar_path: PathBuf,
}

impl RunSummary {
    /// True when every attempted cell ended SUCCESS or REPLAYED. Cells that
    /// never started (stop-on-failure, cancel) don't count against this on
    /// their own.
    pub fn ok(&self) -> bool {
        !self
            .statuses
            .values()
            .any(|s| !s.is_ok() && *s != CellStatus::Skipped)
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

/// Execute a notebook. Lint errors abort before any cell runs.
pub fn run(nb: &Notebook, opts: &RunOptions) -> Result<RunSummary, String> {
    let diags = lint::lint_notebook(nb);
    if lint::has_errors(&diags) {
        let errors: Vec<String> = diags
            .iter()
            .filter(|d| d.severity == lint::Severity::Error)
            .map(|d| d.to_string())
            .collect();
        return Err(format!("lint failed:\n{}", errors.join("\n")));
    }

    let plan = planner::plan(
        nb,
        &PlanOptions {
            select: opts.select.clone(),
            no_deps: opts.no_deps,
            tests_only: opts.tests_only,
        },
    )?;

    let sidecar_path = opts.sidecar_path.clone().unwrap_or_else(|| {
        sidecar::sidecar_path(nb.path.as_deref().unwrap_or(Path::new("notebook.woofnb")))
    });
    let cache_enabled = nb.header.execution.cache == CacheMode::ContentHash;
    let cache_dir = cache::cache_dir(nb);
    let runner_version = cache::key::runner_version();
    let graph_mode = nb.header.execution.order == ExecOrder::Graph;
    let deps = resolver::dep_indexes(nb);

    let mut runner = Runner::new();
    let mut statuses: IndexMap<String, CellStatus> = IndexMap::new();
    let mut not_ok: HashSet<usize> = HashSet::new();
    let mut stop = false;

    for &idx in &plan {
        let cell = &nb.cells[idx];

        if stop || is_cancelled(opts) {
            statuses.insert(cell.id.clone(), CellStatus::Skipped);
            continue;
        }

        if cell.memory_mb.is_some() {
            eprintln!(
                "warning: memory_mb on cell '{}' is recorded but not enforced",
                cell.id
            );
        }

        let timestamp = sidecar::now_rfc3339();

        // Graph order: descendants of anything that failed are blocked.
        if graph_mode {
            if let Some(bad) = deps[idx].iter().copied().find(|d| not_ok.contains(d)) {
                let outputs = vec![Output::error(
                    "UpstreamFailed",
                    format!("dependency '{}' did not succeed", nb.cells[bad].id),
                )];
                record(&sidecar_path, cell, &timestamp, 0, CellStatus::Blocked, outputs);
                statuses.insert(cell.id.clone(), CellStatus::Blocked);
                not_ok.insert(idx);
                continue;
            }
        }

        // Policy gate: a denied bash cell never reaches the backend.
        if !policy::permits_execution(&nb.header.io_policy, cell) {
            let outputs = vec![Output::error(
                "PolicyDenied",
                "io_policy.allow_shell is false",
            )];
            record(&sidecar_path, cell, &timestamp, 0, CellStatus::Blocked, outputs);
            statuses.insert(cell.id.clone(), CellStatus::Blocked);
            not_ok.insert(idx);
            if !graph_mode {
                stop = true;
            }
            continue;
        }

        let key = cache_enabled.then(|| cache::cache_key(nb, idx, &runner_version));
        if let Some(ref k) = key {
            if let Some(entry) = cache::lookup(&cache_dir, &cell.id, k) {
                record(
                    &sidecar_path,
                    cell,
                    &timestamp,
                    entry.elapsed_ms,
                    CellStatus::Replayed,
                    entry.outputs,
                );
                statuses.insert(cell.id.clone(), CellStatus::Replayed);
                continue;
            }
        }

        let started = Instant::now();
        let attempt = execute_with_retries(&mut runner, nb, idx);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status = match attempt.failure {
            None => CellStatus::Success,
            Some(FailureClass::Deterministic) => CellStatus::FailedDeterministic,
            Some(FailureClass::Transient) => CellStatus::FailedExhausted,
        };
        record(
            &sidecar_path,
            cell,
            &timestamp,
            elapsed_ms,
            status,
            attempt.outputs.clone(),
        );

        if status == CellStatus::Success {
            if let Some(k) = key {
                let entry = CacheEntry {
                    key: k,
                    cell_id: cell.id.clone(),
                    outputs: attempt.outputs,
                    elapsed_ms,
                    runner_version: runner_version.clone(),
                };
                if let Err(e) = cache::store(&cache_dir, &entry) {
                    eprintln!("warning: CacheIOError: {}", e);
                }
            }
        } else {
            not_ok.insert(idx);
            if !graph_mode {
                stop = true;
            }
        }
        statuses.insert(cell.id.clone(), status);
    }

    runner.close_all(CLOSE_GRACE);

    Ok(RunSummary {
        statuses,
        sidecar_path,
    })
}

fn is_cancelled(opts: &RunOptions) -> bool {
    opts.cancel
        .as_ref()
        .is_some_and(|c| c.load(Ordering::Relaxed))
}

fn record(
    sidecar_path: &Path,
    cell: &super::model::Cell,
    timestamp: &str,
    elapsed_ms: u64,
    status: CellStatus,
    outputs: Vec<Output>,
) {
    let rec = SidecarRecord {
        cell: cell.id.clone(),
        timestamp: timestamp.to_string(),
        elapsed_ms,
        status,
        outputs,
    };
    if let Err(e) = sidecar::append_record(sidecar_path, &rec) {
        eprintln!("warning: {}", e);
    }
}

/// Retry transient failures with exponential backoff; deterministic failures
/// return immediately. Elapsed time reported for the cell spans all attempts.
fn execute_with_retries(runner: &mut Runner, nb: &Notebook, idx: usize) -> Attempt {
    let retries = nb.cells[idx].retries();
    let mut attempt = execute_cell(runner, nb, idx);
    let mut n = 0;
    while attempt.failure == Some(FailureClass::Transient) && n < retries {
        std::thread::sleep(backoff_delay(n));
        n += 1;
        attempt = execute_cell(runner, nb, idx);
    }
    attempt
}

fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_CAP.min(BACKOFF_BASE * 2u32.saturating_pow(attempt))
}

fn execute_cell(runner: &mut Runner, nb: &Notebook, idx: usize) -> Attempt {
    let cell = &nb.cells[idx];

    if cell.body.trim().is_empty() {
        return Attempt::ok(Vec::new());
    }

    let timeout = cell.effective_timeout(&nb.header).map(Duration::from_secs);
    match cell.cell_type {
        CellType::Data => execute_data_cell(runner, cell),
        CellType::Bash => runner.run_bash(&cell.body, timeout),
        CellType::Code | CellType::Test => {
            let caps = policy::capabilities(&nb.header.io_policy, cell);
            runner.run_code(
                &cell.effective_lang(&nb.header),
                &cell.body,
                caps,
                timeout,
                cell.sidefx() == SideFx::Isolated,
            )
        }
        // The planner never schedules these.
        CellType::Md | CellType::Viz | CellType::Raw => Attempt::ok(Vec::new()),
    }
}

/// Parse a data cell (JSON preferred, YAML fallback), bind the value under
/// the cell id, and report a short repr.
fn execute_data_cell(runner: &mut Runner, cell: &super::model::Cell) -> Attempt {
    let value = match parse_data_body(&cell.body) {
        Ok(v) => v,
        Err(e) => return Attempt::deterministic(vec![Output::error("InvalidDataBody", e)]),
    };
    runner.queue_bind(&cell.id, value.clone());
    Attempt::ok(vec![Output::ExecuteResult {
        repr: short_repr(&value),
    }])
}

fn parse_data_body(body: &str) -> Result<serde_json::Value, String> {
    if let Ok(v) = serde_json::from_str(body) {
        return Ok(v);
    }
    let yaml: serde_yaml_ng::Value =
        serde_yaml_ng::from_str(body).map_err(|e| format!("not valid JSON or YAML: {}", e))?;
    yaml_to_json(&yaml).ok_or_else(|| "YAML value has no JSON representation".to_string())
}

fn yaml_to_json(v: &serde_yaml_ng::Value) -> Option<serde_json::Value> {
    use serde_yaml_ng::Value;
    Some(match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::from_str(&n.to_string()).ok()?,
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(items) => {
            serde_json::Value::Array(items.iter().map(yaml_to_json).collect::<Option<_>>()?)
        }
        Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                let key = match k {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                out.insert(key, yaml_to_json(val)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Tagged(t) => yaml_to_json(&t.value)?,
    })
}

const REPR_LIMIT: usize = 120;

fn short_repr(value: &serde_json::Value) -> String {
    let full = value.to_string();
    if full.chars().count() <= REPR_LIMIT {
        return full;
    }
    let truncated: String = full.chars().take(REPR_LIMIT).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_nb(dir: &Path, name: &str, src: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, src).unwrap();
        path
    }

    fn run_src(dir: &Path, src: &str) -> RunSummary {
        let path = write_nb(dir, "nb.woofnb", src);
        let nb = crate::core::parser::parse_file(&path).unwrap();
        run(&nb, &RunOptions::default()).unwrap()
    }

    fn read_sidecar(summary: &RunSummary) -> Vec<SidecarRecord> {
        sidecar::read_records(&summary.sidecar_path).unwrap()
    }

    #[test]
    fn test_data_only_notebook_succeeds_without_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n\
```cell id=cfg type=data\n{\"n\": 3}\n```\n",
        );
        assert!(summary.ok());
        let records = read_sidecar(&summary);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CellStatus::Success);
        assert_eq!(
            records[0].outputs[0],
            Output::ExecuteResult {
                repr: "{\"n\":3}".to_string()
            }
        );
    }

    #[test]
    fn test_yaml_data_cell() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=cfg type=data\nrows: 3\nnames: [a, b]\n```\n",
        );
        assert!(summary.ok());
        let records = read_sidecar(&summary);
        assert!(matches!(&records[0].outputs[0], Output::ExecuteResult { repr } if repr.contains("rows")));
    }

    #[test]
    fn test_invalid_data_body_fails_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=bad type=data\n{: not data\n```\n",
        );
        assert!(!summary.ok());
        assert_eq!(summary.statuses["bad"], CellStatus::FailedDeterministic);
        let records = read_sidecar(&summary);
        assert!(matches!(&records[0].outputs[0], Output::Error { ename, .. } if ename == "InvalidDataBody"));
    }

    #[test]
    fn test_empty_body_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=a type=code\n```\n",
        );
        assert!(summary.ok());
        let records = read_sidecar(&summary);
        assert_eq!(records[0].status, CellStatus::Success);
        assert!(records[0].outputs.is_empty());
    }

    #[test]
    fn test_policy_denied_bash_is_blocked_and_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=sh type=bash\necho hi\n```\n",
        );
        assert!(!summary.ok());
        assert_eq!(summary.statuses["sh"], CellStatus::Blocked);
        let records = read_sidecar(&summary);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CellStatus::Blocked);
        assert_eq!(records[0].outputs.len(), 1);
        assert!(matches!(&records[0].outputs[0], Output::Error { ename, .. } if ename == "PolicyDenied"));
    }

    #[test]
    fn test_bash_cell_runs_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\nio_policy:\n  allow_shell: true\n\
```cell id=sh type=bash\necho hi\n```\n",
        );
        assert!(summary.ok());
        let records = read_sidecar(&summary);
        assert!(records[0]
            .outputs
            .iter()
            .any(|o| matches!(o, Output::Stream { text, .. } if text.contains("hi"))));
    }

    #[test]
    fn test_linear_failure_stops_subsequent_cells() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n\
```cell id=bad type=data\n{broken\n```\n\
```cell id=later type=data\n1\n```\n",
        );
        assert!(!summary.ok());
        assert_eq!(summary.statuses["bad"], CellStatus::FailedDeterministic);
        assert_eq!(summary.statuses["later"], CellStatus::Skipped);
        // Skipped cells leave no sidecar record.
        assert_eq!(read_sidecar(&summary).len(), 1);
    }

    #[test]
    fn test_graph_failure_blocks_descendants_not_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\nexecution:\n  order: graph\n\
```cell id=bad type=data\n{broken\n```\n\
```cell id=child type=data deps=bad\n1\n```\n\
```cell id=grandchild type=data deps=child\n2\n```\n\
```cell id=sibling type=data\n3\n```\n",
        );
        assert!(!summary.ok());
        assert_eq!(summary.statuses["bad"], CellStatus::FailedDeterministic);
        assert_eq!(summary.statuses["child"], CellStatus::Blocked);
        assert_eq!(summary.statuses["grandchild"], CellStatus::Blocked);
        assert_eq!(summary.statuses["sibling"], CellStatus::Success);

        let records = read_sidecar(&summary);
        let child_rec = records.iter().find(|r| r.cell == "child").unwrap();
        assert!(matches!(&child_rec.outputs[0], Output::Error { ename, evalue, .. }
            if ename == "UpstreamFailed" && evalue.contains("bad")));
    }

    #[test]
    fn test_cache_replay_data_cells() {
        let dir = tempfile::tempdir().unwrap();
        let src = "%WOOFNB 1.0\nname: t\nlanguage: python\nexecution:\n  cache: content-hash\n\
```cell id=one type=data\n1\n```\n\
```cell id=two type=data\n2\n```\n";
        let path = write_nb(dir.path(), "cached.woofnb", src);
        let nb = crate::core::parser::parse_file(&path).unwrap();

        let first = run(&nb, &RunOptions::default()).unwrap();
        assert!(first.ok());
        assert_eq!(first.count(CellStatus::Success), 2);

        let second = run(&nb, &RunOptions::default()).unwrap();
        assert!(second.ok());
        assert_eq!(second.count(CellStatus::Replayed), 2);

        // Sidecar accumulates: 2 executed + 2 replayed.
        let records = sidecar::read_records(&second.sidecar_path).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].status, CellStatus::Replayed);
    }

    #[test]
    fn test_cache_miss_after_body_change() {
        let dir = tempfile::tempdir().unwrap();
        let header = "%WOOFNB 1.0\nname: t\nlanguage: python\nexecution:\n  cache: content-hash\n";
        let path = write_nb(
            dir.path(),
            "mutating.woofnb",
            &format!("{}```cell id=v type=data\n1\n```\n", header),
        );
        let nb = crate::core::parser::parse_file(&path).unwrap();
        assert!(run(&nb, &RunOptions::default()).unwrap().ok());

        std::fs::write(&path, format!("{}```cell id=v type=data\n2\n```\n", header)).unwrap();
        let nb2 = crate::core::parser::parse_file(&path).unwrap();
        let summary = run(&nb2, &RunOptions::default()).unwrap();
        assert_eq!(summary.statuses["v"], CellStatus::Success);
    }

    #[test]
    fn test_failed_cells_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let src = "%WOOFNB 1.0\nname: t\nlanguage: python\nexecution:\n  cache: content-hash\n\
```cell id=bad type=data\n{broken\n```\n";
        let path = write_nb(dir.path(), "failing.woofnb", src);
        let nb = crate::core::parser::parse_file(&path).unwrap();
        run(&nb, &RunOptions::default()).unwrap();
        let summary = run(&nb, &RunOptions::default()).unwrap();
        // Still executed (and failed), not replayed.
        assert_eq!(summary.statuses["bad"], CellStatus::FailedDeterministic);
    }

    #[test]
    fn test_lint_errors_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_nb(
            dir.path(),
            "nb.woofnb",
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=a type=code deps=ghost\n```\n",
        );
        let nb = crate::core::parser::parse_file(&path).unwrap();
        let err = run(&nb, &RunOptions::default()).unwrap_err();
        assert!(err.contains("MissingDep"));
        assert!(!sidecar::sidecar_path(&path).exists());
    }

    #[test]
    fn test_selection_with_deps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_nb(
            dir.path(),
            "nb.woofnb",
            "%WOOFNB 1.0\nname: t\nlanguage: python\n\
```cell id=base type=data\n1\n```\n\
```cell id=mid type=data deps=base\n2\n```\n\
```cell id=extra type=data\n3\n```\n",
        );
        let nb = crate::core::parser::parse_file(&path).unwrap();
        let opts = RunOptions {
            select: vec!["mid".to_string()],
            ..Default::default()
        };
        let summary = run(&nb, &opts).unwrap();
        let ids: Vec<&String> = summary.statuses.keys().collect();
        assert_eq!(ids, vec!["base", "mid"]);
    }

    #[test]
    fn test_cancel_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_nb(
            dir.path(),
            "nb.woofnb",
            "%WOOFNB 1.0\nname: t\nlanguage: python\n```cell id=a type=data\n1\n```\n",
        );
        let nb = crate::core::parser::parse_file(&path).unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let opts = RunOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let summary = run(&nb, &opts).unwrap();
        assert_eq!(summary.statuses["a"], CellStatus::Skipped);
        assert!(!summary.sidecar_path.exists());
    }

    #[test]
    fn test_retries_exhaust_on_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\nio_policy:\n  allow_shell: true\n\
```cell id=crash type=bash retries=1\nkill -9 $$\n```\n",
        );
        assert_eq!(summary.statuses["crash"], CellStatus::FailedExhausted);
        // One sidecar record despite two attempts.
        assert_eq!(read_sidecar(&summary).len(), 1);
    }

    #[test]
    fn test_code_cell_executes_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let src = "%WOOFNB 1.0\nname: t\nlanguage: python\nexecution:\n  cache: content-hash\n\
```cell id=hello type=code\nprint(\"hi\")\n```\n";
        let path = write_nb(dir.path(), "code.woofnb", src);
        let nb = crate::core::parser::parse_file(&path).unwrap();

        let first = run(&nb, &RunOptions::default()).unwrap();
        assert!(first.ok(), "{:?}", first.statuses);
        let second = run(&nb, &RunOptions::default()).unwrap();
        assert_eq!(second.statuses["hello"], CellStatus::Replayed);

        let records = sidecar::read_records(&second.sidecar_path).unwrap();
        let replay = records.last().unwrap();
        assert!(replay
            .outputs
            .iter()
            .any(|o| matches!(o, Output::Stream { text, .. } if text.contains("hi"))));
    }

    #[test]
    fn test_data_binding_feeds_code_cell() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\n\
```cell id=cfg type=data\n{\"n\": 20}\n```\n\
```cell id=use type=code deps=cfg\nprint(cfg[\"n\"] + 1)\n```\n",
        );
        assert!(summary.ok(), "{:?}", summary.statuses);
        let records = read_sidecar(&summary);
        let use_rec = records.iter().find(|r| r.cell == "use").unwrap();
        assert!(use_rec
            .outputs
            .iter()
            .any(|o| matches!(o, Output::Stream { text, .. } if text.contains("21"))));
    }

    #[test]
    fn test_timeout_cell_fails_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\nio_policy:\n  allow_shell: true\n\
```cell id=slow type=bash timeout=1\nsleep 5\n```\n",
        );
        assert_eq!(summary.statuses["slow"], CellStatus::FailedExhausted);
        let records = read_sidecar(&summary);
        assert!(records[0]
            .outputs
            .iter()
            .any(|o| matches!(o, Output::Error { ename, .. } if ename == "Timeout")));
    }

    #[test]
    fn test_header_default_timeout_applies() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_src(
            dir.path(),
            "%WOOFNB 1.0\nname: t\nlanguage: python\ndefaults:\n  timeout_sec: 1\nio_policy:\n  allow_shell: true\n\
```cell id=slow type=bash\nsleep 5\n```\n",
        );
        assert_eq!(summary.statuses["slow"], CellStatus::FailedExhausted);
    }

    #[test]
    fn test_short_repr_truncates() {
        let long: Vec<u32> = (0..200).collect();
        let repr = short_repr(&serde_json::json!(long));
        assert!(repr.chars().count() <= REPR_LIMIT + 1);
        assert!(repr.ends_with('…'));
        assert_eq!(short_repr(&serde_json::json!(3)), "3");
    }

    #[test]
    fn test_backoff_delay_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(100));
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
        assert_eq!(backoff_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_yaml_to_json_conversion() {
        let yaml: serde_yaml_ng::Value =
            serde_yaml_ng::from_str("a: [1, true, null]\nb: text\n").unwrap();
        let json = yaml_to_json(&yaml).unwrap();
        assert_eq!(json, serde_json::json!({"a": [1, true, null], "b": "text"}));
    }
}
