use std::time::{Duration, Instant};

use crate::capability::{Capability, CapabilityDetector};
use crate::config::DisplayServer;
use crate::core::{CollectorResult, Severity};
use crate::exec::{CancelToken, CommandRunner, ExecutionResult, SpawnError, display_command};
use crate::files::FileSource;
use crate::mounts::MountEntry;

pub mod graphics;
pub mod logs;
pub mod network;
pub mod raid;
pub mod storage;
pub mod system;

pub use graphics::GraphicsCollector;
pub use logs::LogsCollector;
pub use network::NetworkCollector;
pub use raid::RaidCollector;
pub use storage::StorageCollector;
pub use system::SystemCollector;

/// Everything a collector is allowed to touch. Configuration is passed
/// in here explicitly; collectors never read the process environment.
pub struct CollectContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub detector: &'a CapabilityDetector,
    pub files: &'a dyn FileSource,
    pub mounts: &'a [MountEntry],
    pub display_server: DisplayServer,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
    pub cancel: &'a CancelToken,
}

impl CollectContext<'_> {
    /// Remaining per-command budget, clamped by the run deadline.
    pub fn command_timeout(&self) -> Duration {
        let Some(deadline) = self.deadline else {
            return self.timeout;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::cmp::min(self.timeout, remaining)
    }

    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<ExecutionResult, SpawnError> {
        self.runner
            .run(cmd, args, self.command_timeout(), self.cancel)
    }

    pub fn exec_with_timeout(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExecutionResult, SpawnError> {
        self.runner.run(cmd, args, timeout, self.cancel)
    }
}

pub trait Collector: Sync {
    fn name(&self) -> &'static str;

    fn required_capabilities(&self) -> Vec<Capability>;

    /// Category-specific checks. Only called once the capability gate
    /// in `run` has passed.
    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult);

    /// If none of the declared capabilities are present the collector
    /// never shells out: it reports one skip reason per capability.
    fn run(&self, ctx: &CollectContext) -> CollectorResult {
        let mut out = CollectorResult::new(self.name());
        let caps = self.required_capabilities();
        if !caps.is_empty() && !caps.iter().any(|cap| ctx.detector.has(cap)) {
            for cap in &caps {
                out.skip(cap.name, format!("{} not available", cap.name));
            }
            return out;
        }
        self.collect(ctx, &mut out);
        out
    }
}

/// The detect → run → report shape shared by every sub-check: a missing
/// capability becomes a skip reason, a timeout a warning, a spawn
/// failure a critical finding for this sub-check only. The caller gets
/// the output back whenever the tool actually ran.
pub(crate) fn run_gated(
    ctx: &CollectContext,
    out: &mut CollectorResult,
    cap: &Capability,
    check: &str,
    cmd: &str,
    args: &[&str],
) -> Option<ExecutionResult> {
    if !ctx.detector.has(cap) {
        out.skip(check, format!("{} not available", cap.name));
        return None;
    }
    match ctx.exec(cmd, args) {
        Err(err) => {
            out.finding_with_evidence(
                Severity::Critical,
                format!("{check}: check could not start"),
                err.to_string(),
            );
            None
        }
        Ok(result) if result.timed_out => {
            out.finding_with_evidence(
                Severity::Warning,
                format!("{check}: check timed out"),
                display_command(cmd, args),
            );
            None
        }
        Ok(result) => Some(result),
    }
}

/// No usable data in the tool's output: an info finding with the raw
/// text attached, never an error.
pub(crate) fn note_unparsed(
    out: &mut CollectorResult,
    check: &str,
    result: &ExecutionResult,
) {
    let raw = if result.stdout.trim().is_empty() {
        result.stderr.trim()
    } else {
        result.stdout.trim()
    };
    let mut evidence = format!("{} (exit={})", result.command, result.exit_code);
    if !raw.is_empty() {
        evidence.push('\n');
        evidence.push_str(&truncate_evidence(raw, 6));
    }
    out.finding_with_evidence(
        Severity::Info,
        format!("{check}: no usable output"),
        evidence,
    );
}

pub(crate) fn truncate_evidence(text: &str, max_lines: usize) -> String {
    let mut lines: Vec<&str> = text.lines().take(max_lines).collect();
    let total = text.lines().count();
    if total > max_lines {
        lines.push("...");
    }
    lines.join("\n")
}

/// Everything the CLI can schedule, in report order.
pub fn all_collectors() -> Vec<Box<dyn Collector + Send + Sync>> {
    vec![
        Box::new(RaidCollector),
        Box::new(StorageCollector),
        Box::new(GraphicsCollector),
        Box::new(NetworkCollector),
        Box::new(SystemCollector),
        Box::new(LogsCollector),
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::capability::Probes;
    use crate::files::fixtures::FixtureFiles;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probes that report a fixed set of executables and paths.
    pub struct StubProbes {
        pub executables: Vec<&'static str>,
        pub paths: Vec<&'static str>,
        pub modules: Vec<&'static str>,
        pub processes: Vec<&'static str>,
    }

    impl StubProbes {
        pub fn none() -> Self {
            Self {
                executables: vec![],
                paths: vec![],
                modules: vec![],
                processes: vec![],
            }
        }

        pub fn with_executables(executables: Vec<&'static str>) -> Self {
            Self {
                executables,
                ..Self::none()
            }
        }
    }

    impl Probes for StubProbes {
        fn executable_on_path(&self, name: &str) -> bool {
            self.executables.contains(&name)
        }

        fn path_exists(&self, path: &Path) -> bool {
            self.paths.iter().any(|p| Path::new(p) == path)
        }

        fn module_loaded(&self, name: &str) -> bool {
            self.modules.contains(&name)
        }

        fn process_running(&self, name: &str) -> bool {
            self.processes.contains(&name)
        }
    }

    /// Canned command outputs keyed by command name, plus a call count
    /// so tests can assert a runner was never touched.
    pub struct StubRunner {
        pub outputs: Mutex<Vec<(String, ExecutionResult)>>,
        pub calls: AtomicUsize,
    }

    impl StubRunner {
        pub fn new() -> Self {
            Self {
                outputs: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn on(self, cmd: &str, exit_code: i32, stdout: &str) -> Self {
            self.outputs.lock().unwrap().push((
                cmd.to_string(),
                ExecutionResult {
                    command: cmd.to_string(),
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                    timed_out: false,
                },
            ));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CommandRunner for StubRunner {
        fn run(
            &self,
            cmd: &str,
            args: &[&str],
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> Result<ExecutionResult, SpawnError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outputs = self.outputs.lock().unwrap();
            // Prefer the most specific registration: "cmd arg0" over "cmd".
            let with_first_arg = args
                .first()
                .map(|a| format!("{cmd} {a}"))
                .unwrap_or_else(|| cmd.to_string());
            if let Some((_, result)) = outputs.iter().find(|(k, _)| *k == with_first_arg) {
                let mut result = result.clone();
                result.command = display_command(cmd, args);
                return Ok(result);
            }
            if let Some((_, result)) = outputs.iter().find(|(k, _)| *k == cmd) {
                let mut result = result.clone();
                result.command = display_command(cmd, args);
                return Ok(result);
            }
            Ok(ExecutionResult {
                command: display_command(cmd, args),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
                timed_out: false,
            })
        }
    }

    pub struct TestEnv {
        pub runner: StubRunner,
        pub detector: CapabilityDetector,
        pub files: FixtureFiles,
        pub mounts: Vec<MountEntry>,
    }

    impl TestEnv {
        pub fn new(probes: StubProbes, runner: StubRunner) -> Self {
            Self {
                runner,
                detector: CapabilityDetector::new(Box::new(probes)),
                files: FixtureFiles::new(),
                mounts: Vec::new(),
            }
        }

        pub fn ctx<'a>(&'a self, cancel: &'a CancelToken) -> CollectContext<'a> {
            CollectContext {
                runner: &self.runner,
                detector: &self.detector,
                files: &self.files,
                mounts: &self.mounts,
                display_server: DisplayServer::Unknown,
                timeout: Duration::from_secs(5),
                deadline: None,
                cancel,
            }
        }
    }

    /// Shared property: with every capability absent, a collector emits
    /// no findings, at least one skip reason and no runner calls.
    pub fn assert_skips_without_capabilities(collector: &dyn Collector) {
        let env = TestEnv::new(StubProbes::none(), StubRunner::new());
        let cancel = CancelToken::new();
        let result = collector.run(&env.ctx(&cancel));
        assert_eq!(
            result.findings.len(),
            0,
            "{}: expected no findings",
            collector.name()
        );
        assert!(
            !result.skipped.is_empty(),
            "{}: expected skip reasons",
            collector.name()
        );
        assert_eq!(
            env.runner.call_count(),
            0,
            "{}: runner must not be invoked",
            collector.name()
        );
    }
}
