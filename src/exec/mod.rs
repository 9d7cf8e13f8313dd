use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

/// Cooperative cancellation shared between the CLI, the runner and the
/// benchmark sampling loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// The command could not be launched at all. Distinct from "ran but
/// exited non-zero", which is plain data in `ExecutionResult`.
#[derive(Debug)]
pub struct SpawnError {
    pub command: String,
    pub source: std::io::Error,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to launch {}: {}", self.command, self.source)
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// The single seam through which collectors touch the outside world.
pub trait CommandRunner: Sync {
    fn run(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SpawnError>;
}

/// Real process execution with a hard timeout. The child is killed on
/// timeout or cancellation and whatever output was captured so far is
/// still returned.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

const WAIT_SLICE: Duration = Duration::from_millis(50);
const READ_GRACE: Duration = Duration::from_millis(250);

/// Drains one pipe on a background thread. A grandchild that survives
/// the kill can hold the write end open forever, so the main thread
/// never reads the pipe itself; it copies whatever the drain thread
/// has buffered so far.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Arc<AtomicBool>,
}

impl PipeCapture {
    fn start(reader: Option<impl Read + Send + 'static>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicBool::new(false));
        match reader {
            Some(mut reader) => {
                let buf = Arc::clone(&buf);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut chunk = [0u8; 4096];
                    loop {
                        match reader.read(&mut chunk) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf
                                .lock()
                                .expect("pipe buffer poisoned")
                                .extend_from_slice(&chunk[..n]),
                        }
                    }
                    done.store(true, Ordering::SeqCst);
                });
            }
            None => done.store(true, Ordering::SeqCst),
        }
        Self { buf, done }
    }

    fn finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> String {
        let bytes = self.buf.lock().expect("pipe buffer poisoned");
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SpawnError> {
        let display = display_command(cmd, args);
        let start = Instant::now();

        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SpawnError {
                command: display.clone(),
                source,
            })?;

        let stdout_cap = PipeCapture::start(child.stdout.take());
        let stderr_cap = PipeCapture::start(child.stderr.take());

        let deadline = start + timeout;
        let mut timed_out = false;
        let mut exit_code = -1;

        loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                timed_out = true;
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                let _ = child.kill();
                let _ = child.wait();
                timed_out = true;
                break;
            }
            let slice = remaining.min(WAIT_SLICE);
            match child.wait_timeout(slice) {
                Ok(Some(status)) => {
                    exit_code = status.code().unwrap_or(-1);
                    break;
                }
                Ok(None) => continue,
                Err(_) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
            }
        }

        // The drain threads hit EOF once every write end closes; give
        // them a bounded grace period and take whatever is buffered.
        let grace = Instant::now() + READ_GRACE;
        while !(stdout_cap.finished() && stderr_cap.finished()) && Instant::now() < grace {
            std::thread::sleep(Duration::from_millis(5));
        }

        Ok(ExecutionResult {
            command: display,
            exit_code,
            stdout: stdout_cap.snapshot(),
            stderr: stderr_cap.snapshot(),
            duration: start.elapsed(),
            timed_out,
        })
    }
}

pub fn display_command(cmd: &str, args: &[&str]) -> String {
    if args.is_empty() {
        cmd.to_string()
    } else {
        format!("{cmd} {}", args.join(" "))
    }
}
