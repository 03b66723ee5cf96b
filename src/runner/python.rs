//! Persistent python kernel sessions.
//!
//! One kernel process per session speaks JSON Lines over stdin/stdout:
//! `run_cell` executes a cell body in the session's globals, `bind` installs
//! a data-cell value, `ping` checks liveness. The kernel captures the cell's
//! stdout/stderr, evaluates a trailing expression for `execute_result`, and
//! applies the per-cell capability gate (file and socket denial) inside the
//! interpreter. A dedicated reader thread drains the kernel's stdout so
//! responses are never stuck behind a full pipe.

use super::Attempt;
use crate::core::model::Output;
use crate::core::policy::Capabilities;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// How long a cooperative interrupt may take before the kernel is killed.
const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// Ceiling for bookkeeping requests (bind, ping) that should never stall.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

const KERNEL_PROGRAM: &str = r#"
import ast, builtins, io, json, socket, sys, traceback
from contextlib import redirect_stderr, redirect_stdout

GLOBALS = {"__name__": "__main__", "woof": {}}


def run_cell(code, allow_files, allow_network):
    outputs = []
    out_buf, err_buf = io.StringIO(), io.StringIO()
    orig_open, orig_socket = builtins.open, socket.socket

    def deny_open(*args, **kwargs):
        raise PermissionError("file access denied by notebook policy")

    class DenySocket(socket.socket):
        def __init__(self, *args, **kwargs):
            raise PermissionError("network access denied by notebook policy")

    result_repr = None
    try:
        tree = ast.parse(code, "<cell>", "exec")
        trailing = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            trailing = ast.Expression(tree.body.pop(-1).value)
        if not allow_files:
            builtins.open = deny_open
        if not allow_network:
            socket.socket = DenySocket
        try:
            with redirect_stdout(out_buf), redirect_stderr(err_buf):
                exec(compile(tree, "<cell>", "exec"), GLOBALS, GLOBALS)
                if trailing is not None:
                    value = eval(compile(trailing, "<cell>", "eval"), GLOBALS, GLOBALS)
                    if value is not None:
                        result_repr = repr(value)
        finally:
            builtins.open = orig_open
            socket.socket = orig_socket
    except BaseException as exc:
        outputs.append({
            "output_type": "error",
            "ename": type(exc).__name__,
            "evalue": str(exc),
            "traceback": traceback.format_exc().splitlines(),
        })
    if out_buf.getvalue():
        outputs.insert(0, {"output_type": "stream", "name": "stdout", "text": out_buf.getvalue()})
    if err_buf.getvalue():
        outputs.append({"output_type": "stream", "name": "stderr", "text": err_buf.getvalue()})
    if result_repr is not None:
        outputs.append({"output_type": "execute_result", "repr": result_repr})
    return outputs


while True:
    try:
        line = sys.stdin.readline()
        if not line:
            break
        line = line.strip()
        if not line:
            continue
        try:
            req = json.loads(line)
        except ValueError:
            continue
        cmd = req.get("command")
        if cmd == "run_cell":
            outs = run_cell(req.get("code", ""), bool(req.get("allow_files")), bool(req.get("allow_network")))
            resp = {"id": req.get("id"), "status": "ok", "outputs": outs}
        elif cmd == "bind":
            name = req.get("name", "")
            GLOBALS["woof"][name] = req.get("value")
            if name.isidentifier():
                GLOBALS[name] = req.get("value")
            resp = {"id": req.get("id"), "status": "ok", "outputs": []}
        elif cmd == "ping":
            resp = {"id": req.get("id"), "status": "ok", "outputs": []}
        else:
            resp = {"id": req.get("id"), "status": "error", "error": "unknown command"}
        sys.stdout.write(json.dumps(resp) + "\n")
        sys.stdout.flush()
    except KeyboardInterrupt:
        continue
"#;

enum RequestFailure {
    TimedOut,
    Crashed(String),
}

pub struct KernelSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    stderr_buf: Arc<Mutex<String>>,
    next_id: u64,
    alive: bool,
}

impl KernelSession {
    /// Spawn a fresh kernel process.
    pub fn spawn() -> Result<Self, String> {
        let mut child = Command::new("python3")
            .arg("-c")
            .arg(KERNEL_PROGRAM)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn python3: {}", e))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "kernel stdout not captured".to_string())?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(mut pipe) = stderr {
            let buf = Arc::clone(&stderr_buf);
            std::thread::spawn(move || {
                let mut text = String::new();
                if pipe.read_to_string(&mut text).is_ok() {
                    if let Ok(mut b) = buf.lock() {
                        b.push_str(&text);
                    }
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            lines: rx,
            stderr_buf,
            next_id: 0,
            alive: true,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn stderr_tail(&self) -> String {
        let buf = self
            .stderr_buf
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        let tail: String = buf.lines().rev().take(5).collect::<Vec<_>>().join("; ");
        if tail.is_empty() {
            "kernel process ended unexpectedly".to_string()
        } else {
            tail
        }
    }

    /// Send one request and wait for the response with a matching id. Stale
    /// responses (an interrupted cell answering late) are discarded.
    fn request(
        &mut self,
        mut payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, RequestFailure> {
        self.next_id += 1;
        let id = self.next_id;
        payload["id"] = serde_json::json!(id);

        let line = format!("{}\n", payload);
        let write_ok = self
            .stdin
            .as_mut()
            .map(|s| s.write_all(line.as_bytes()).and_then(|_| s.flush()))
            .unwrap_or_else(|| Err(std::io::Error::other("kernel stdin closed")));
        if let Err(e) = write_ok {
            return Err(RequestFailure::Crashed(format!(
                "kernel write failed: {} ({})",
                e,
                self.stderr_tail()
            )));
        }

        self.await_response(id, timeout.map(|t| Instant::now() + t))
    }

    fn await_response(
        &mut self,
        id: u64,
        deadline: Option<Instant>,
    ) -> Result<serde_json::Value, RequestFailure> {
        loop {
            let received = match deadline {
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(RequestFailure::TimedOut);
                    }
                    self.lines.recv_timeout(remaining)
                }
                None => self
                    .lines
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            let line = match received {
                Ok(l) => l,
                Err(RecvTimeoutError::Timeout) => return Err(RequestFailure::TimedOut),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RequestFailure::Crashed(self.stderr_tail()))
                }
            };
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    return Err(RequestFailure::Crashed(format!(
                        "malformed kernel reply: {}",
                        e
                    )))
                }
            };
            if value.get("id").and_then(serde_json::Value::as_u64) == Some(id) {
                return Ok(value);
            }
        }
    }

    /// Install a symbol-table binding.
    pub fn bind(&mut self, name: &str, value: &serde_json::Value) -> Result<(), String> {
        let req = serde_json::json!({"command": "bind", "name": name, "value": value});
        match self.request(req, Some(CONTROL_TIMEOUT)) {
            Ok(_) => Ok(()),
            Err(_) => {
                self.terminate();
                Err(format!("kernel rejected binding '{}'", name))
            }
        }
    }

    /// Execute one cell body, classifying the outcome for the retry logic.
    pub fn run_cell(
        &mut self,
        code: &str,
        caps: Capabilities,
        timeout: Option<Duration>,
    ) -> Attempt {
        let req = serde_json::json!({
            "command": "run_cell",
            "code": code,
            "allow_files": caps.fs,
            "allow_network": caps.net,
        });
        match self.request(req, timeout) {
            Ok(resp) => self.parse_outputs(resp),
            Err(RequestFailure::TimedOut) => self.handle_timeout(timeout.unwrap_or_default()),
            Err(RequestFailure::Crashed(e)) => {
                self.terminate();
                Attempt::transient(vec![Output::error("BackendCrashed", e)])
            }
        }
    }

    fn parse_outputs(&mut self, resp: serde_json::Value) -> Attempt {
        let outputs = resp.get("outputs").cloned().unwrap_or_default();
        match serde_json::from_value::<Vec<Output>>(outputs) {
            Ok(outputs) => {
                if outputs.iter().any(Output::is_error) {
                    Attempt::deterministic(outputs)
                } else {
                    Attempt::ok(outputs)
                }
            }
            Err(e) => {
                self.terminate();
                Attempt::transient(vec![Output::error(
                    "BackendCrashed",
                    format!("malformed kernel outputs: {}", e),
                )])
            }
        }
    }

    /// Timeout path: try a cooperative interrupt first, then kill and mark
    /// the session dead so the pool respawns it.
    fn handle_timeout(&mut self, limit: Duration) -> Attempt {
        let timeout_output = Output::error("Timeout", format!("cell exceeded {}s", limit.as_secs()));

        self.interrupt();
        let answered = self
            .await_response(self.next_id, Some(Instant::now() + INTERRUPT_GRACE))
            .is_ok();
        if answered {
            // The interrupted cell answered; session stays usable.
            return Attempt::transient(vec![timeout_output]);
        }

        self.terminate();
        Attempt::transient(vec![timeout_output])
    }

    #[cfg(unix)]
    fn interrupt(&mut self) {
        let _ = Command::new("kill")
            .arg("-INT")
            .arg(self.child.id().to_string())
            .status();
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) {}

    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.alive = false;
    }

    /// Orderly shutdown: close stdin so the kernel loop exits, wait up to
    /// `grace`, then force-terminate.
    pub fn close(mut self, grace: Duration) {
        self.stdin.take();
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    self.alive = false;
                    return;
                }
                Ok(None) => {}
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        self.terminate();
    }
}
