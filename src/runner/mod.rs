//! Cell execution backends and the per-notebook session pool.
//!
//! Two backends exist: a persistent python kernel (code/test cells and data
//! bindings) and one-shot bash (bash cells). Shared sessions live for the
//! whole run and keep top-level bindings; `sidefx=isolated` cells get a
//! fresh kernel that is closed afterward. Data-cell bindings are queued and
//! replayed into whichever session ends up needing them, so a notebook
//! without code cells never spawns an interpreter.

pub mod python;
pub mod shell;

use crate::core::model::Output;
use crate::core::policy::Capabilities;
use std::collections::HashMap;
use std::time::Duration;

/// Grace period for session shutdown before force-termination.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

const SUPPORTED_LANGUAGES: &[&str] = &["python", "python3"];

pub fn is_supported_language(lang: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&lang)
}

/// How an attempt failed, deciding whether retries apply. Timeouts, backend
/// crashes, and capture I/O errors are transient; user errors never retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Deterministic,
    Transient,
}

/// One execution attempt's captured outputs and classification.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub outputs: Vec<Output>,
    pub failure: Option<FailureClass>,
}

impl Attempt {
    pub fn ok(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            failure: None,
        }
    }

    pub fn deterministic(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            failure: Some(FailureClass::Deterministic),
        }
    }

    pub fn transient(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            failure: Some(FailureClass::Transient),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

struct SharedSession {
    session: python::KernelSession,
    applied_binds: usize,
}

/// Session pool for one run. Shared sessions are keyed by language.
#[derive(Default)]
pub struct Runner {
    shared: HashMap<String, SharedSession>,
    binds: Vec<(String, serde_json::Value)>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a symbol-table binding (data-cell value). Applied to a shared
    /// session before its next cell, and replayed into fresh sessions.
    pub fn queue_bind(&mut self, name: &str, value: serde_json::Value) {
        self.binds.push((name.to_string(), value));
    }

    /// Execute a code/test cell body.
    pub fn run_code(
        &mut self,
        lang: &str,
        code: &str,
        caps: Capabilities,
        timeout: Option<Duration>,
        isolated: bool,
    ) -> Attempt {
        if !is_supported_language(lang) {
            return Attempt::deterministic(vec![Output::error(
                "UnsupportedLanguage",
                format!("no backend registered for language '{}'", lang),
            )]);
        }

        if isolated {
            return self.run_isolated(code, caps, timeout);
        }

        // Drop a dead shared session so it respawns.
        if self
            .shared
            .get(lang)
            .is_some_and(|s| !s.session.is_alive())
        {
            self.shared.remove(lang);
        }

        if !self.shared.contains_key(lang) {
            let session = match python::KernelSession::spawn() {
                Ok(s) => s,
                Err(e) => return Attempt::transient(vec![Output::error("BackendCrashed", e)]),
            };
            self.shared.insert(
                lang.to_string(),
                SharedSession {
                    session,
                    applied_binds: 0,
                },
            );
        }

        let applied = self.shared.get(lang).map_or(0, |s| s.applied_binds);
        let pending: Vec<(String, serde_json::Value)> = self.binds[applied..].to_vec();
        let total = self.binds.len();

        let shared = self.shared.get_mut(lang).unwrap();
        for (name, value) in &pending {
            if let Err(e) = shared.session.bind(name, value) {
                return Attempt::transient(vec![Output::error("BackendCrashed", e)]);
            }
        }
        shared.applied_binds = total;

        shared.session.run_cell(code, caps, timeout)
    }

    fn run_isolated(
        &mut self,
        code: &str,
        caps: Capabilities,
        timeout: Option<Duration>,
    ) -> Attempt {
        let mut session = match python::KernelSession::spawn() {
            Ok(s) => s,
            Err(e) => return Attempt::transient(vec![Output::error("BackendCrashed", e)]),
        };
        for (name, value) in &self.binds {
            if let Err(e) = session.bind(name, value) {
                session.close(CLOSE_GRACE);
                return Attempt::transient(vec![Output::error("BackendCrashed", e)]);
            }
        }
        let attempt = session.run_cell(code, caps, timeout);
        session.close(CLOSE_GRACE);
        attempt
    }

    /// Execute a bash cell body.
    pub fn run_bash(&mut self, code: &str, timeout: Option<Duration>) -> Attempt {
        shell::run_bash(code, timeout)
    }

    /// Close every shared session, waiting up to `grace` each.
    pub fn close_all(&mut self, grace: Duration) {
        for (_, shared) in self.shared.drain() {
            shared.session.close(grace);
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.close_all(CLOSE_GRACE);
    }
}
