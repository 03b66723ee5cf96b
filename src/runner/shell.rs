//! One-shot bash backend for bash cells.
//!
//! The body is piped to `bash` over stdin. Reader threads drain stdout and
//! stderr eagerly so the child never blocks on a full pipe, and captured
//! chunks keep their arrival order across both streams.

use super::Attempt;
use crate::core::model::{Output, StreamName};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_BUF_SIZE: usize = 8192;

type ChunkLog = Arc<Mutex<Vec<(StreamName, Vec<u8>)>>>;

/// Run a bash cell body, enforcing an optional wall-clock timeout.
pub fn run_bash(code: &str, timeout: Option<Duration>) -> Attempt {
    let mut child = match Command::new("bash")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return Attempt::transient(vec![Output::error(
                "BackendCrashed",
                format!("failed to spawn bash: {}", e),
            )])
        }
    };

    let chunks: ChunkLog = Arc::new(Mutex::new(Vec::new()));
    let pumps = [
        spawn_pump(child.stdout.take(), StreamName::Stdout, &chunks),
        spawn_pump(child.stderr.take(), StreamName::Stderr, &chunks),
    ];

    // bash consumes its script incrementally, and the pumps keep its output
    // pipes drained, so a plain blocking write is safe here.
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(code.as_bytes());
    }

    let status = wait_with_deadline(&mut child, timeout);
    for pump in pumps {
        if let Some(p) = pump {
            let _ = p.join();
        }
    }
    let mut outputs = coalesce(&chunks.lock().unwrap_or_else(|e| e.into_inner()));

    match status {
        WaitOutcome::Exited(code) if code == 0 => Attempt::ok(outputs),
        WaitOutcome::Exited(code) => {
            outputs.push(Output::error("Runtime", format!("exit status {}", code)));
            Attempt::deterministic(outputs)
        }
        WaitOutcome::Signalled => {
            outputs.push(Output::error("BackendCrashed", "terminated by signal"));
            Attempt::transient(outputs)
        }
        WaitOutcome::TimedOut(limit) => {
            outputs.push(Output::error(
                "Timeout",
                format!("cell exceeded {}s", limit.as_secs()),
            ));
            Attempt::transient(outputs)
        }
        WaitOutcome::WaitFailed(e) => {
            outputs.push(Output::error("BackendCrashed", e));
            Attempt::transient(outputs)
        }
    }
}

enum WaitOutcome {
    Exited(i32),
    Signalled,
    TimedOut(Duration),
    WaitFailed(String),
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> WaitOutcome {
    let deadline = timeout.map(|t| (Instant::now() + t, t));
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return match status.code() {
                    Some(code) => WaitOutcome::Exited(code),
                    None => WaitOutcome::Signalled,
                };
            }
            Ok(None) => {}
            Err(e) => return WaitOutcome::WaitFailed(format!("wait error: {}", e)),
        }
        if let Some((at, limit)) = deadline {
            if Instant::now() >= at {
                let _ = child.kill();
                let _ = child.wait();
                return WaitOutcome::TimedOut(limit);
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_pump<R: Read + Send + 'static>(
    pipe: Option<R>,
    name: StreamName,
    chunks: &ChunkLog,
) -> Option<JoinHandle<()>> {
    let mut pipe = pipe?;
    let chunks = Arc::clone(chunks);
    Some(std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut log) = chunks.lock() {
                        log.push((name, buf[..n].to_vec()));
                    }
                }
            }
        }
    }))
}

/// Merge adjacent same-stream chunks, then decode. Merging at the byte level
/// keeps multi-byte characters split across reads intact.
fn coalesce(chunks: &[(StreamName, Vec<u8>)]) -> Vec<Output> {
    let mut outputs: Vec<(StreamName, Vec<u8>)> = Vec::new();
    for (name, bytes) in chunks {
        match outputs.last_mut() {
            Some((last, buf)) if last == name => buf.extend_from_slice(bytes),
            _ => outputs.push((*name, bytes.clone())),
        }
    }
    outputs
        .into_iter()
        .map(|(name, bytes)| Output::stream(name, String::from_utf8_lossy(&bytes).to_string()))
        .collect()
}
