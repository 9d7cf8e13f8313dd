use std::path::Path;

use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, note_unparsed, run_gated, truncate_evidence};
use crate::core::{CollectorResult, Severity};

const TEMP_WARNING_C: f64 = 90.0;
const TEMP_CRITICAL_C: f64 = 100.0;
const MEM_WARNING_PCT: f64 = 10.0;
const MEM_CRITICAL_PCT: f64 = 3.0;

/// Load, memory pressure, sensor temperatures and failed services.
pub struct SystemCollector;

impl Collector for SystemCollector {
    fn name(&self) -> &'static str {
        "system"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![
            capability::PROC_LOADAVG,
            capability::PROC_MEMINFO,
            capability::SENSORS,
            capability::SYSTEMCTL,
        ]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        load_check(ctx, out);
        memory_check(ctx, out);
        sensors_check(ctx, out);
        failed_units_check(ctx, out);
    }
}

fn load_check(ctx: &CollectContext, out: &mut CollectorResult) {
    if !ctx.detector.has(&capability::PROC_LOADAVG) {
        out.skip("load", "proc-loadavg not available");
        return;
    }
    let loadavg = match ctx.files.read_to_string(Path::new("/proc/loadavg")) {
        Ok(text) => text,
        Err(err) => {
            out.skip("load", format!("loadavg unreadable: {err}"));
            return;
        }
    };
    let Some(load1) = loadavg.split_whitespace().next().and_then(|s| s.parse::<f64>().ok())
    else {
        out.finding_with_evidence(
            Severity::Info,
            "load: no usable output",
            loadavg.trim().to_string(),
        );
        return;
    };

    let cores = ctx
        .files
        .read_to_string(Path::new("/proc/cpuinfo"))
        .map(|text| {
            text.lines()
                .filter(|line| line.starts_with("processor"))
                .count()
        })
        .unwrap_or(0)
        .max(1) as f64;

    let message = format!("load average {load1:.2} over {cores} core(s)");
    if load1 >= cores * 2.0 {
        out.finding_with_evidence(Severity::Critical, message, loadavg.trim().to_string());
    } else if load1 >= cores {
        out.finding_with_evidence(Severity::Warning, message, loadavg.trim().to_string());
    } else {
        out.finding(Severity::Info, message);
    }
}

fn memory_check(ctx: &CollectContext, out: &mut CollectorResult) {
    if !ctx.detector.has(&capability::PROC_MEMINFO) {
        out.skip("memory", "proc-meminfo not available");
        return;
    }
    let meminfo = match ctx.files.read_to_string(Path::new("/proc/meminfo")) {
        Ok(text) => text,
        Err(err) => {
            out.skip("memory", format!("meminfo unreadable: {err}"));
            return;
        }
    };

    let (Some(total), Some(available)) = (
        meminfo_kb(&meminfo, "MemTotal:"),
        meminfo_kb(&meminfo, "MemAvailable:"),
    ) else {
        out.finding_with_evidence(
            Severity::Info,
            "memory: no usable output",
            truncate_evidence(&meminfo, 4),
        );
        return;
    };
    if total == 0 {
        return;
    }

    let available_pct = available as f64 / total as f64 * 100.0;
    let message = format!(
        "memory: {:.1}% of {} MiB available",
        available_pct,
        total / 1024
    );
    if available_pct <= MEM_CRITICAL_PCT {
        out.finding(Severity::Critical, message);
    } else if available_pct <= MEM_WARNING_PCT {
        out.finding(Severity::Warning, message);
    } else {
        out.finding(Severity::Info, message);
    }
}

pub(crate) fn meminfo_kb(meminfo: &str, label: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with(label))?
        .split_whitespace()
        .nth(1)?
        .parse::<u64>()
        .ok()
}

fn sensors_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(ctx, out, &capability::SENSORS, "sensors", "sensors", &[])
    else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "sensors", &result);
        return;
    }

    let mut hottest: Option<(String, f64)> = None;
    for line in result.stdout_lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(temp) = parse_celsius(rest) else {
            continue;
        };
        if hottest.as_ref().is_none_or(|(_, t)| temp > *t) {
            hottest = Some((label.trim().to_string(), temp));
        }
        if temp >= TEMP_CRITICAL_C {
            out.finding_with_evidence(
                Severity::Critical,
                format!("{}: {temp}°C", label.trim()),
                line.trim().to_string(),
            );
        } else if temp >= TEMP_WARNING_C {
            out.finding_with_evidence(
                Severity::Warning,
                format!("{}: {temp}°C", label.trim()),
                line.trim().to_string(),
            );
        }
    }
    match hottest {
        Some((label, temp)) => {
            out.finding(Severity::Info, format!("hottest sensor: {label} at {temp}°C"))
        }
        None => note_unparsed(out, "sensors", &result),
    }
}

// "+45.0°C  (high = +80.0°C)" -> 45.0
fn parse_celsius(text: &str) -> Option<f64> {
    let text = text.trim();
    let end = text.find("°C")?;
    let token = text[..end].split_whitespace().last()?;
    token.trim_start_matches('+').parse::<f64>().ok()
}

fn failed_units_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::SYSTEMCTL,
        "failed-units",
        "systemctl",
        &["--failed", "--no-legend", "--plain"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "failed-units", &result);
        return;
    }

    let failed: Vec<&str> = result
        .stdout_lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|unit| !unit.is_empty())
        .collect();
    if failed.is_empty() {
        out.finding(Severity::Info, "no failed systemd units");
        return;
    }
    for unit in failed {
        out.finding(Severity::Warning, format!("systemd unit failed: {unit}"));
    }
}
