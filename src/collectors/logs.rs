use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, run_gated, truncate_evidence};
use crate::core::{CollectorResult, Severity};

/// Scans the kernel ring buffer and the current boot's journal for
/// error-level messages and classifies the known-bad patterns.
pub struct LogsCollector;

impl Collector for LogsCollector {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![capability::DMESG, capability::JOURNALCTL]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        dmesg_check(ctx, out);
        journal_check(ctx, out);
    }
}

// Patterns that point at hardware trouble rather than software noise.
const CRITICAL_PATTERNS: &[&str] = &[
    "I/O error",
    "Out of memory",
    "oom-kill",
    "Hardware Error",
    "Machine Check",
    "MCE",
];

fn classify_lines(
    out: &mut CollectorResult,
    source: &str,
    lines: &[&str],
) {
    if lines.is_empty() {
        out.finding(Severity::Info, format!("{source}: no error-level messages"));
        return;
    }

    let critical: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| CRITICAL_PATTERNS.iter().any(|p| line.contains(p)))
        .collect();

    if !critical.is_empty() {
        out.finding_with_evidence(
            Severity::Critical,
            format!(
                "{source}: {} message(s) indicating hardware trouble",
                critical.len()
            ),
            truncate_evidence(&critical.join("\n"), 6),
        );
    }
    let remaining = lines.len() - critical.len();
    if remaining > 0 {
        out.finding_with_evidence(
            Severity::Warning,
            format!("{source}: {remaining} error-level message(s)"),
            truncate_evidence(
                &lines
                    .iter()
                    .copied()
                    .filter(|line| !critical.contains(line))
                    .collect::<Vec<_>>()
                    .join("\n"),
                6,
            ),
        );
    }
}

fn dmesg_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::DMESG,
        "kernel-log",
        "dmesg",
        &["--level", "err,crit", "--notime"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        // Commonly EPERM without privileges.
        super::note_unparsed(out, "kernel-log", &result);
        return;
    }
    let lines: Vec<&str> = result
        .stdout_lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    classify_lines(out, "kernel-log", &lines);
}

fn journal_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::JOURNALCTL,
        "journal",
        "journalctl",
        &["-p", "err", "-b", "--no-pager", "-q"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        super::note_unparsed(out, "journal", &result);
        return;
    }
    let lines: Vec<&str> = result
        .stdout_lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("-- "))
        .collect();
    classify_lines(out, "journal", &lines);
}
