use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, run_gated};
use crate::core::{BenchmarkSample, CollectorResult, Severity, summarize_samples};

/// Grace on top of the requested duration before a benchmark child is
/// considered hung.
const BENCH_GRACE: Duration = Duration::from_secs(15);
const CANCEL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchKind {
    Storage,
    Graphics,
    System,
}

impl BenchKind {
    pub const fn collector_name(self) -> &'static str {
        match self {
            BenchKind::Storage => "benchmark-storage",
            BenchKind::Graphics => "benchmark-graphics",
            BenchKind::System => "benchmark-system",
        }
    }
}

impl fmt::Display for BenchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BenchKind::Storage => "storage",
            BenchKind::Graphics => "graphics",
            BenchKind::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for BenchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storage" => Ok(BenchKind::Storage),
            "graphics" => Ok(BenchKind::Graphics),
            "system" => Ok(BenchKind::System),
            other => Err(format!(
                "invalid benchmark kind: {other} (storage|graphics|system)"
            )),
        }
    }
}

/// A duration-bounded collector: runs the category's load generator if
/// one is installed and samples a metric at a fixed interval.
pub struct BenchmarkRunner {
    kind: BenchKind,
    duration: Duration,
    interval: Duration,
}

impl BenchmarkRunner {
    /// Parameters are validated up front; nothing is executed until
    /// `run`.
    pub fn new(kind: BenchKind, duration: Duration, interval: Duration) -> Result<Self> {
        if duration.is_zero() {
            bail!("benchmark duration must be greater than zero");
        }
        if interval.is_zero() {
            bail!("benchmark sampling interval must be greater than zero");
        }
        if interval > duration {
            bail!(
                "benchmark sampling interval ({interval:?}) must not exceed the duration ({duration:?})"
            );
        }
        Ok(Self {
            kind,
            duration,
            interval,
        })
    }

    pub fn kind(&self) -> BenchKind {
        self.kind
    }

    fn tool_timeout(&self) -> Duration {
        self.duration + BENCH_GRACE
    }
}

impl Collector for BenchmarkRunner {
    fn name(&self) -> &'static str {
        self.kind.collector_name()
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        match self.kind {
            BenchKind::Storage => vec![capability::DD, capability::FIO, capability::DISKSTATS],
            BenchKind::Graphics => vec![
                capability::GLMARK2,
                capability::NVIDIA_SMI,
                capability::AMDGPU_SYSFS,
            ],
            BenchKind::System => vec![
                capability::STRESS_NG,
                capability::PROC_LOADAVG,
                capability::PROC_MEMINFO,
            ],
        }
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        match self.kind {
            BenchKind::Storage => storage_bench(self, ctx, out),
            BenchKind::Graphics => graphics_bench(self, ctx, out),
            BenchKind::System => system_bench(self, ctx, out),
        }
        for stats in summarize_samples(&out.samples) {
            out.finding(
                Severity::Info,
                format!(
                    "sampled {}: min {:.2} / mean {:.2} / max {:.2} over {} sample(s)",
                    stats.metric, stats.min, stats.mean, stats.max, stats.count
                ),
            );
        }
    }
}

/// Ticks every `interval` until `duration` has passed or the run is
/// cancelled, recording one sample per tick when `read` yields a value.
fn sample_loop(
    ctx: &CollectContext,
    duration: Duration,
    interval: Duration,
    metric: &str,
    mut read: impl FnMut(&CollectContext) -> Option<f64>,
) -> Vec<BenchmarkSample> {
    let mut samples = Vec::new();
    let start = Instant::now();
    let ticks = (duration.as_millis() / interval.as_millis()).max(1) as u32;

    for tick in 1..=ticks {
        let target = interval * tick;
        while start.elapsed() < target {
            if ctx.cancel.is_cancelled() {
                return samples;
            }
            let remaining = target - start.elapsed().min(target);
            std::thread::sleep(remaining.min(CANCEL_SLICE));
        }
        if ctx.cancel.is_cancelled() {
            return samples;
        }
        if let Some(value) = read(ctx) {
            samples.push(BenchmarkSample {
                offset_secs: start.elapsed().as_secs_f64(),
                metric: metric.to_string(),
                value,
            });
        }
    }
    samples
}

fn storage_bench(bench: &BenchmarkRunner, ctx: &CollectContext, out: &mut CollectorResult) {
    // Exclusive scratch space; removed on every exit path, including
    // cancellation, by the guard's destructor.
    let scratch = match tempfile::Builder::new().prefix("hwdoctor-bench-").tempdir() {
        Ok(dir) => dir,
        Err(err) => {
            out.skip("sequential-io", format!("cannot create scratch dir: {err}"));
            return;
        }
    };
    let payload = scratch.path().join("payload.bin");
    let payload_s = payload.display().to_string();
    let of_arg = format!("of={payload_s}");
    let if_arg = format!("if={payload_s}");

    let mut side = CollectorResult::new(out.collector.clone());
    let samples = std::thread::scope(|scope| {
        let side_ref = &mut side;
        scope.spawn(move || {
            sequential_io(bench, ctx, side_ref, &of_arg, &if_arg);
            fio_bench(bench, ctx, side_ref, scratch.path());
        });
        sample_loop(ctx, bench.duration, bench.interval, "disk.inflight_ios", read_inflight_ios)
    });
    out.merge(side);
    out.samples.extend(samples);
}

fn sequential_io(
    bench: &BenchmarkRunner,
    ctx: &CollectContext,
    out: &mut CollectorResult,
    of_arg: &str,
    if_arg: &str,
) {
    if !ctx.detector.has(&capability::DD) {
        out.skip("sequential-io", "dd not available");
        return;
    }

    let write_args = ["if=/dev/zero", of_arg, "bs=1M", "count=256", "conv=fdatasync"];
    match ctx.exec_with_timeout("dd", &write_args, bench.tool_timeout()) {
        Err(err) => {
            out.finding_with_evidence(
                Severity::Critical,
                "sequential write: check could not start",
                err.to_string(),
            );
            return;
        }
        Ok(result) if result.timed_out => {
            out.finding_with_evidence(
                Severity::Warning,
                "sequential write: check timed out",
                result.command,
            );
            return;
        }
        Ok(result) => match parse_dd_throughput(&result.stderr) {
            Some(rate) => out.finding(Severity::Info, format!("sequential write: {rate}")),
            None => super::collectors::note_unparsed(out, "sequential-write", &result),
        },
    }

    let read_args = [if_arg, "of=/dev/null", "bs=1M"];
    match ctx.exec_with_timeout("dd", &read_args, bench.tool_timeout()) {
        Err(err) => out.finding_with_evidence(
            Severity::Critical,
            "sequential read: check could not start",
            err.to_string(),
        ),
        Ok(result) if result.timed_out => out.finding_with_evidence(
            Severity::Warning,
            "sequential read: check timed out",
            result.command,
        ),
        Ok(result) => match parse_dd_throughput(&result.stderr) {
            Some(rate) => out.finding(Severity::Info, format!("sequential read: {rate}")),
            None => super::collectors::note_unparsed(out, "sequential-read", &result),
        },
    }
}

fn fio_bench(
    bench: &BenchmarkRunner,
    ctx: &CollectContext,
    out: &mut CollectorResult,
    scratch: &Path,
) {
    if !ctx.detector.has(&capability::FIO) {
        out.skip("random-io", "fio not available");
        return;
    }
    let dir_arg = format!("--directory={}", scratch.display());
    let runtime_arg = format!("--runtime={}", bench.duration.as_secs().max(1));
    let args = [
        "--name=randrw",
        dir_arg.as_str(),
        "--size=32M",
        "--rw=randrw",
        "--time_based",
        runtime_arg.as_str(),
        "--group_reporting",
    ];
    match ctx.exec_with_timeout("fio", &args, bench.tool_timeout()) {
        Err(err) => out.finding_with_evidence(
            Severity::Critical,
            "random-io: check could not start",
            err.to_string(),
        ),
        Ok(result) if result.timed_out => out.finding_with_evidence(
            Severity::Warning,
            "random-io: check timed out",
            result.command,
        ),
        Ok(result) => {
            let mut parsed = false;
            for line in result.stdout_lines() {
                let trimmed = line.trim();
                if trimmed.contains("IOPS=") {
                    parsed = true;
                    out.finding(Severity::Info, format!("fio {trimmed}"));
                }
            }
            if !parsed {
                super::collectors::note_unparsed(out, "random-io", &result);
            }
        }
    }
}

// "268435456 bytes (268 MB, 256 MiB) copied, 1.19 s, 225 MB/s"
fn parse_dd_throughput(stderr: &str) -> Option<String> {
    for line in stderr.lines().rev() {
        if !line.contains("copied,") {
            continue;
        }
        let rate = line.rsplit(',').next()?.trim();
        if rate.ends_with("/s") {
            return Some(rate.to_string());
        }
    }
    None
}

fn read_inflight_ios(ctx: &CollectContext) -> Option<f64> {
    if !ctx.detector.has(&capability::DISKSTATS) {
        return None;
    }
    let text = ctx
        .files
        .read_to_string(Path::new("/proc/diskstats"))
        .ok()?;
    let mut total = 0u64;
    let mut seen = false;
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") {
            continue;
        }
        if let Ok(inflight) = fields[11].parse::<u64>() {
            total += inflight;
            seen = true;
        }
    }
    seen.then_some(total as f64)
}

fn graphics_bench(bench: &BenchmarkRunner, ctx: &CollectContext, out: &mut CollectorResult) {
    let mut side = CollectorResult::new(out.collector.clone());
    let samples = std::thread::scope(|scope| {
        let side_ref = &mut side;
        scope.spawn(move || glmark2_run(bench, ctx, side_ref));
        sample_loop(
            ctx,
            bench.duration,
            bench.interval,
            "gpu.utilization_pct",
            read_gpu_utilization,
        )
    });
    out.merge(side);
    if samples.is_empty()
        && !ctx.detector.has(&capability::NVIDIA_SMI)
        && !ctx.detector.has(&capability::AMDGPU_SYSFS)
    {
        out.skip("gpu-utilization", "no GPU utilization source available");
    }
    out.samples.extend(samples);
}

fn glmark2_run(bench: &BenchmarkRunner, ctx: &CollectContext, out: &mut CollectorResult) {
    if !ctx.detector.has(&capability::GLMARK2) {
        out.skip("frame-rate", "glmark2 not available");
        return;
    }
    match ctx.exec_with_timeout("glmark2", &[], bench.tool_timeout()) {
        Err(err) => out.finding_with_evidence(
            Severity::Critical,
            "frame-rate: check could not start",
            err.to_string(),
        ),
        Ok(result) => {
            // A timed-out run still carries per-scene FPS lines.
            if let Some(score) = parse_glmark2_score(&result.stdout) {
                out.finding(Severity::Info, format!("glmark2 score: {score}"));
            } else if let Some(fps) = parse_mean_fps(&result.stdout) {
                out.finding(Severity::Info, format!("mean frame rate: {fps:.1} fps"));
            } else if result.timed_out {
                out.finding_with_evidence(
                    Severity::Warning,
                    "frame-rate: check timed out",
                    result.command,
                );
            } else {
                super::collectors::note_unparsed(out, "frame-rate", &result);
            }
        }
    }
}

fn parse_glmark2_score(stdout: &str) -> Option<u64> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("glmark2 Score:") {
            return rest.trim().parse::<u64>().ok();
        }
    }
    None
}

fn parse_mean_fps(stdout: &str) -> Option<f64> {
    let mut values = Vec::new();
    for line in stdout.lines() {
        let Some(idx) = line.find("FPS:") else {
            continue;
        };
        let token = line[idx + 4..].trim().split_whitespace().next()?;
        if let Ok(fps) = token.parse::<f64>() {
            values.push(fps);
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn read_gpu_utilization(ctx: &CollectContext) -> Option<f64> {
    if ctx.detector.has(&capability::NVIDIA_SMI) {
        let result = ctx
            .exec("nvidia-smi", &["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
            .ok()?;
        if result.success() {
            return result.stdout.lines().next()?.trim().parse::<f64>().ok();
        }
    }
    if ctx.detector.has(&capability::AMDGPU_SYSFS) {
        let text = ctx
            .files
            .read_to_string(Path::new("/sys/class/drm/card0/device/gpu_busy_percent"))
            .ok()?;
        return text.trim().parse::<f64>().ok();
    }
    None
}

fn system_bench(bench: &BenchmarkRunner, ctx: &CollectContext, out: &mut CollectorResult) {
    let mut side = CollectorResult::new(out.collector.clone());
    let samples = std::thread::scope(|scope| {
        let side_ref = &mut side;
        scope.spawn(move || stress_run(bench, ctx, side_ref));
        sample_loop(ctx, bench.duration, bench.interval, "cpu.load1", read_load1)
    });
    out.merge(side);
    out.samples.extend(samples);

    if ctx.detector.has(&capability::PROC_MEMINFO) {
        if let Ok(meminfo) = ctx.files.read_to_string(Path::new("/proc/meminfo")) {
            if let (Some(total), Some(available)) = (
                crate::collectors::system::meminfo_kb(&meminfo, "MemTotal:"),
                crate::collectors::system::meminfo_kb(&meminfo, "MemAvailable:"),
            ) {
                if total > 0 {
                    out.finding(
                        Severity::Info,
                        format!(
                            "memory after load: {:.1}% available",
                            available as f64 / total as f64 * 100.0
                        ),
                    );
                }
            }
        }
    }
}

fn stress_run(bench: &BenchmarkRunner, ctx: &CollectContext, out: &mut CollectorResult) {
    if !ctx.detector.has(&capability::STRESS_NG) {
        out.skip("cpu-stress", "stress-ng not available");
        return;
    }
    let timeout_arg = format!("--timeout={}s", bench.duration.as_secs().max(1));
    let args = ["--cpu", "0", timeout_arg.as_str(), "--metrics-brief"];
    match ctx.exec_with_timeout("stress-ng", &args, bench.tool_timeout()) {
        Err(err) => out.finding_with_evidence(
            Severity::Critical,
            "cpu-stress: check could not start",
            err.to_string(),
        ),
        Ok(result) if result.timed_out => out.finding_with_evidence(
            Severity::Warning,
            "cpu-stress: check timed out",
            result.command,
        ),
        Ok(result) => {
            let ops = result
                .stdout
                .lines()
                .chain(result.stderr.lines())
                .find(|line| line.contains("bogo ops"))
                .map(str::trim);
            match ops {
                Some(line) => out.finding(Severity::Info, format!("stress-ng {line}")),
                None => out.finding(Severity::Info, "cpu stress completed"),
            }
        }
    }
}

fn read_load1(ctx: &CollectContext) -> Option<f64> {
    if !ctx.detector.has(&capability::PROC_LOADAVG) {
        return None;
    }
    let text = ctx.files.read_to_string(Path::new("/proc/loadavg")).ok()?;
    text.split_whitespace().next()?.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{StubProbes, StubRunner, TestEnv};
    use crate::exec::CancelToken;
    use crate::files::fixtures::FixtureFiles;

    #[test]
    fn unknown_kind_fails_before_any_execution() {
        let err = "unknown".parse::<BenchKind>().expect_err("must not parse");
        assert!(err.contains("invalid benchmark kind"));
    }

    #[test]
    fn zero_duration_and_bad_interval_are_rejected() {
        assert!(BenchmarkRunner::new(
            BenchKind::System,
            Duration::ZERO,
            Duration::from_secs(1)
        )
        .is_err());
        assert!(BenchmarkRunner::new(
            BenchKind::System,
            Duration::from_secs(2),
            Duration::ZERO
        )
        .is_err());
        assert!(BenchmarkRunner::new(
            BenchKind::System,
            Duration::from_secs(1),
            Duration::from_secs(2)
        )
        .is_err());
    }

    fn system_env() -> TestEnv {
        let mut env = TestEnv::new(
            StubProbes {
                executables: vec!["stress-ng"],
                paths: vec!["/proc/loadavg", "/proc/meminfo"],
                ..StubProbes::none()
            },
            StubRunner::new().on("stress-ng", 0, "stress-ng: info: successful run\n"),
        );
        env.files = FixtureFiles::new()
            .with("/proc/loadavg", "1.25 1.00 0.75 2/300 999\n")
            .with(
                "/proc/meminfo",
                "MemTotal:       16000000 kB\nMemAvailable:    8000000 kB\n",
            );
        env
    }

    #[test]
    fn system_bench_two_seconds_at_one_second_interval_yields_two_samples() {
        let bench = BenchmarkRunner::new(
            BenchKind::System,
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .expect("valid parameters");
        let env = system_env();
        let cancel = CancelToken::new();
        let result = bench.run(&env.ctx(&cancel));

        assert_eq!(result.samples.len(), 2);
        assert!(result.samples.iter().all(|s| s.metric == "cpu.load1"));
        assert!(result.samples[0].offset_secs >= 1.0);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("sampled cpu.load1")));
        assert!(!result.findings.iter().any(|f| f.message.contains("timed out")));
    }

    #[test]
    fn cancellation_stops_the_sampling_loop_early() {
        let bench = BenchmarkRunner::new(
            BenchKind::System,
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .expect("valid parameters");
        let env = system_env();
        let cancel = CancelToken::new();
        cancel.cancel();

        let start = Instant::now();
        let result = bench.run(&env.ctx(&cancel));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(result.samples.is_empty());
    }

    #[test]
    fn storage_bench_scratch_dir_is_removed() {
        let bench = BenchmarkRunner::new(
            BenchKind::Storage,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .expect("valid parameters");
        let dd_out = "256+0 records in\n256+0 records out\n268435456 bytes (268 MB, 256 MiB) copied, 1.19 s, 225 MB/s\n";
        let mut runner = StubRunner::new();
        runner.outputs.lock().unwrap().push((
            "dd".to_string(),
            crate::exec::ExecutionResult {
                command: "dd".to_string(),
                exit_code: 0,
                stdout: String::new(),
                stderr: dd_out.to_string(),
                duration: Duration::from_millis(5),
                timed_out: false,
            },
        ));
        let env = TestEnv::new(StubProbes::with_executables(vec!["dd"]), runner);
        let cancel = CancelToken::new();
        let result = bench.run(&env.ctx(&cancel));

        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("sequential write: 225 MB/s")));
        assert!(result
            .skipped
            .iter()
            .any(|s| s.check == "random-io" && s.reason.contains("fio")));

        let leftovers: Vec<_> = std::fs::read_dir(std::env::temp_dir())
            .expect("read temp dir")
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("hwdoctor-bench-")
            })
            .collect();
        assert!(leftovers.is_empty(), "scratch dirs left behind");
    }

    #[test]
    fn dd_throughput_parses_the_summary_line() {
        let stderr = "268435456 bytes (268 MB, 256 MiB) copied, 1.19 s, 225 MB/s\n";
        assert_eq!(parse_dd_throughput(stderr).as_deref(), Some("225 MB/s"));
        assert_eq!(parse_dd_throughput("garbage"), None);
    }

    #[test]
    fn glmark2_parsers_pick_score_then_fps() {
        let full = "[build] use-vbo=false: FPS: 4200 FrameTime: 0.238 ms\nglmark2 Score: 4100\n";
        assert_eq!(parse_glmark2_score(full), Some(4100));
        let partial = "[build] FPS: 100\n[texture] FPS: 200\n";
        assert_eq!(parse_glmark2_score(partial), None);
        assert_eq!(parse_mean_fps(partial), Some(150.0));
    }
}
