//! Invariant checks over a parsed notebook.
//!
//! Produces diagnostics with stable codes; error-severity findings abort a
//! run before planning.

use super::model::{is_valid_cell_id, CellType, ExecOrder, Notebook, SideFx};
use super::resolver;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARN"),
        }
    }
}

/// Stable diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintCode {
    MissingHeaderKey,
    DuplicateCellId,
    BadCellId,
    MissingDep,
    Cycle,
    PolicyConflict,
    UnknownToken,
    DisabledDep,
    UnknownLang,
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingHeaderKey => "MissingHeaderKey",
            Self::DuplicateCellId => "DuplicateCellId",
            Self::BadCellId => "BadCellId",
            Self::MissingDep => "MissingDep",
            Self::Cycle => "Cycle",
            Self::PolicyConflict => "PolicyConflict",
            Self::UnknownToken => "UnknownToken",
            Self::DisabledDep => "DisabledDep",
            Self::UnknownLang => "UnknownLang",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: LintCode,
    pub cell_id: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell_id {
            Some(id) => write!(f, "{} {} [{}]: {}", self.severity, self.code, id, self.message),
            None => write!(f, "{} {}: {}", self.severity, self.code, self.message),
        }
    }
}

fn error(code: LintCode, cell_id: Option<&str>, message: String) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        code,
        cell_id: cell_id.map(String::from),
        message,
    }
}

fn warning(code: LintCode, cell_id: Option<&str>, message: String) -> Diagnostic {
    Diagnostic {
        severity: Severity::Warning,
        code,
        cell_id: cell_id.map(String::from),
        message,
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.severity == Severity::Error)
}

/// Run every check and return the findings in a stable order.
pub fn lint_notebook(nb: &Notebook) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    // Required header keys.
    for (key, value) in [("name", &nb.header.name), ("language", &nb.header.language)] {
        if value.is_none() {
            diags.push(error(
                LintCode::MissingHeaderKey,
                None,
                format!("header is missing required key '{}'", key),
            ));
        }
    }

    // Cell-id shape and uniqueness.
    let mut seen: HashSet<&str> = HashSet::new();
    for c in &nb.cells {
        if !is_valid_cell_id(&c.id) {
            diags.push(error(
                LintCode::BadCellId,
                Some(&c.id),
                format!("cell id '{}' is not [A-Za-z0-9._-]+", c.id),
            ));
        }
        if !seen.insert(&c.id) {
            diags.push(error(
                LintCode::DuplicateCellId,
                Some(&c.id),
                format!("duplicate cell id '{}'", c.id),
            ));
        }
    }

    // Dependency references.
    let ids: HashSet<&str> = nb.cells.iter().map(|c| c.id.as_str()).collect();
    for c in &nb.cells {
        for dep in &c.deps {
            if !ids.contains(dep.as_str()) {
                diags.push(error(
                    LintCode::MissingDep,
                    Some(&c.id),
                    format!("dependency '{}' does not exist", dep),
                ));
            }
        }
    }

    // Cycles matter only when the graph drives scheduling.
    if nb.header.execution.order == ExecOrder::Graph {
        if let Err(members) = resolver::topo_order(nb) {
            diags.push(error(
                LintCode::Cycle,
                None,
                format!("dependency cycle involving: {}", members.join(", ")),
            ));
        }
    }

    // Policy consistency.
    for c in &nb.cells {
        let sidefx = c.sidefx();
        if sidefx == SideFx::Shell && c.cell_type != CellType::Bash {
            diags.push(error(
                LintCode::PolicyConflict,
                Some(&c.id),
                format!("sidefx=shell requires a bash cell, found type={}", c.cell_type),
            ));
        }
        let denied = match sidefx {
            SideFx::Fs if !nb.header.io_policy.allow_files => Some("allow_files"),
            SideFx::Net if !nb.header.io_policy.allow_network => Some("allow_network"),
            SideFx::Shell if !nb.header.io_policy.allow_shell => Some("allow_shell"),
            _ => None,
        };
        if let Some(flag) = denied {
            diags.push(warning(
                LintCode::PolicyConflict,
                Some(&c.id),
                format!("declares sidefx={} but io_policy.{} is false; execution will fail closed", sidefx, flag),
            ));
        }
        if c.cell_type == CellType::Bash
            && sidefx != SideFx::Shell
            && !nb.header.io_policy.allow_shell
        {
            diags.push(warning(
                LintCode::PolicyConflict,
                Some(&c.id),
                "bash cell without io_policy.allow_shell; execution will fail closed".to_string(),
            ));
        }
    }

    // Unknown fence tokens.
    for c in &nb.cells {
        for key in c.extra.keys() {
            diags.push(warning(
                LintCode::UnknownToken,
                Some(&c.id),
                format!("unknown token '{}'", key),
            ));
        }
    }

    // Disabled cells that something still depends on.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in &nb.cells {
        for dep in &c.deps {
            dependents.entry(dep.as_str()).or_default().push(&c.id);
        }
    }
    for c in &nb.cells {
        if !c.is_disabled() {
            continue;
        }
        if let Some(users) = dependents.get(c.id.as_str()) {
            let active: Vec<&str> = users
                .iter()
                .filter(|id| {
                    nb.cells
                        .iter()
                        .find(|x| x.id == **id)
                        .is_some_and(|x| !x.is_disabled())
                })
                .copied()
                .collect();
            if !active.is_empty() {
                diags.push(warning(
                    LintCode::DisabledDep,
                    Some(&c.id),
                    format!("disabled but depended on by: {}", active.join(", ")),
                ));
            }
        }
    }

    // Languages without a registered backend.
    for c in &nb.cells {
        if matches!(c.cell_type, CellType::Code | CellType::Test) {
            let lang = c.effective_lang(&nb.header);
            if !crate::runner::is_supported_language(&lang) {
                diags.push(warning(
                    LintCode::UnknownLang,
                    Some(&c.id),
                    format!("no backend registered for language '{}'", lang),
                ));
            }
        }
    }

    diags
}
