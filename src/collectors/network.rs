use std::path::PathBuf;

use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, note_unparsed, run_gated};
use crate::core::{CollectorResult, Severity};

/// Link state per interface, default route presence, negotiated speed
/// and sysfs error counters.
pub struct NetworkCollector;

impl Collector for NetworkCollector {
    fn name(&self) -> &'static str {
        "network"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![capability::IP, capability::ETHTOOL]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        let interfaces = link_check(ctx, out);
        route_check(ctx, out);
        for iface in &interfaces {
            speed_check(ctx, out, iface);
            error_counter_check(ctx, out, iface);
        }
    }
}

/// Returns the interfaces that are up, for the per-interface checks.
fn link_check(ctx: &CollectContext, out: &mut CollectorResult) -> Vec<String> {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::IP,
        "links",
        "ip",
        &["-o", "link", "show"],
    ) else {
        return Vec::new();
    };
    if result.exit_code != 0 {
        note_unparsed(out, "links", &result);
        return Vec::new();
    }

    let mut up = Vec::new();
    let mut total = 0usize;
    for line in result.stdout_lines() {
        // "2: enp5s0: <BROADCAST,...> mtu 1500 ... state UP ..."
        let mut fields = line.split_whitespace();
        let Some(name) = fields.nth(1).map(|n| n.trim_end_matches(':')) else {
            continue;
        };
        if name == "lo" {
            continue;
        }
        total += 1;
        let state = line
            .split_whitespace()
            .skip_while(|f| *f != "state")
            .nth(1)
            .unwrap_or("UNKNOWN");
        match state {
            "UP" => {
                out.finding(Severity::Info, format!("{name}: link up"));
                up.push(name.to_string());
            }
            "DOWN" => out.finding(Severity::Info, format!("{name}: link down")),
            other => out.finding(Severity::Info, format!("{name}: link state {other}")),
        }
    }
    if total > 0 && up.is_empty() {
        out.finding(Severity::Warning, "no network interface is up");
    }
    up
}

fn route_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::IP,
        "default-route",
        "ip",
        &["route", "show", "default"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "default-route", &result);
        return;
    }
    if result.stdout.trim().is_empty() {
        out.finding(Severity::Warning, "no default route configured");
    } else {
        let route = result.stdout.lines().next().unwrap_or("").trim();
        out.finding(Severity::Info, format!("default route: {route}"));
    }
}

fn speed_check(ctx: &CollectContext, out: &mut CollectorResult, iface: &str) {
    let check = format!("speed:{iface}");
    let Some(result) = run_gated(ctx, out, &capability::ETHTOOL, &check, "ethtool", &[iface])
    else {
        return;
    };
    if result.exit_code != 0 {
        // Virtual interfaces commonly reject ethtool; not a fault.
        out.skip(check.as_str(), format!("{iface}: no ethtool link info"));
        return;
    }

    let mut speed = None;
    let mut duplex = None;
    for line in result.stdout_lines() {
        let trimmed = line.trim();
        if let Some(v) = trimmed.strip_prefix("Speed:") {
            speed = Some(v.trim().to_string());
        } else if let Some(v) = trimmed.strip_prefix("Duplex:") {
            duplex = Some(v.trim().to_string());
        }
    }
    match (speed, duplex) {
        (Some(speed), duplex) if speed != "Unknown!" => {
            let duplex = duplex.unwrap_or_else(|| "unknown".to_string());
            out.finding(
                Severity::Info,
                format!("{iface}: {speed}, {} duplex", duplex.to_lowercase()),
            );
            if duplex.eq_ignore_ascii_case("half") {
                out.finding(
                    Severity::Warning,
                    format!("{iface}: running at half duplex"),
                );
            }
        }
        _ => note_unparsed(out, &check, &result),
    }
}

fn error_counter_check(ctx: &CollectContext, out: &mut CollectorResult, iface: &str) {
    let mut errors = 0u64;
    let mut readable = false;
    for counter in ["rx_errors", "tx_errors"] {
        let path = PathBuf::from(format!("/sys/class/net/{iface}/statistics/{counter}"));
        if let Ok(text) = ctx.files.read_to_string(&path) {
            readable = true;
            errors += text.trim().parse::<u64>().unwrap_or(0);
        }
    }
    if !readable {
        out.skip(
            format!("errors:{iface}"),
            format!("{iface}: statistics not readable"),
        );
        return;
    }
    if errors > 0 {
        out.finding(
            Severity::Warning,
            format!("{iface}: {errors} rx/tx errors"),
        );
    } else {
        out.finding(Severity::Info, format!("{iface}: no rx/tx errors"));
    }
}
