use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, run_gated, truncate_evidence};
use crate::core::{CollectorResult, Severity};

/// Checks every RAID flavor independently: Linux md, MegaRAID, HP Smart
/// Array, Dell PERC, Adaptec and ZFS pools. A missing vendor CLI skips
/// only its own sub-check.
pub struct RaidCollector;

impl Collector for RaidCollector {
    fn name(&self) -> &'static str {
        "raid"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![
            capability::MDSTAT,
            capability::MDADM,
            capability::MEGARAID_CLI,
            capability::SSACLI,
            capability::PERCCLI,
            capability::ARCCONF,
            capability::ZPOOL,
        ]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        let arrays = mdstat_check(ctx, out);
        mdadm_check(ctx, out, &arrays);
        megaraid_check(ctx, out);
        hp_smart_array_check(ctx, out);
        perc_check(ctx, out);
        adaptec_check(ctx, out);
        zpool_check(ctx, out);
    }
}

/// Returns the md array names found, for the mdadm detail pass.
fn mdstat_check(ctx: &CollectContext, out: &mut CollectorResult) -> Vec<String> {
    if !ctx.detector.has(&capability::MDSTAT) {
        out.skip("mdstat", "mdstat not available");
        return Vec::new();
    }
    let text = match ctx.files.read_to_string(std::path::Path::new("/proc/mdstat")) {
        Ok(text) => text,
        Err(err) => {
            out.skip("mdstat", format!("mdstat unreadable: {err}"));
            return Vec::new();
        }
    };

    let mut arrays = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("md") && trimmed.contains(" : ") {
            let name = trimmed.split(' ').next().unwrap_or("md?");
            arrays.push(name.to_string());
            if trimmed.contains("(F)") {
                out.finding_with_evidence(
                    Severity::Warning,
                    format!("{name}: array has a failed member"),
                    trimmed.to_string(),
                );
            }
        }
        // Status line: [UU] healthy, any '_' means a missing member.
        // The member map is the last bracketed group on the line.
        if let Some(start) = trimmed.rfind('[') {
            let status = &trimmed[start..];
            if status.starts_with('[')
                && status.contains('_')
                && status.chars().skip(1).take_while(|c| *c != ']').all(|c| c == 'U' || c == '_')
            {
                out.finding_with_evidence(
                    Severity::Warning,
                    "md array degraded (missing member)",
                    trimmed.to_string(),
                );
            }
        }
        if trimmed.contains("recovery") || trimmed.contains("resync") {
            out.finding_with_evidence(
                Severity::Warning,
                "md array rebuilding",
                trimmed.to_string(),
            );
        }
    }
    if arrays.is_empty() {
        out.finding(Severity::Info, "no md arrays configured");
    } else {
        out.finding(Severity::Info, format!("{} md array(s) present", arrays.len()));
    }
    arrays
}

fn mdadm_check(ctx: &CollectContext, out: &mut CollectorResult, arrays: &[String]) {
    if arrays.is_empty() {
        return;
    }
    // One skip covers every array; a failure on one array must not
    // drop the detail pass for its siblings.
    if !ctx.detector.has(&capability::MDADM) {
        out.skip("mdadm", "mdadm not available");
        return;
    }
    for array in arrays {
        let check = format!("mdadm:{array}");
        let device = format!("/dev/{array}");
        let Some(result) = run_gated(
            ctx,
            out,
            &capability::MDADM,
            &check,
            "mdadm",
            &["--detail", device.as_str()],
        ) else {
            continue;
        };
        if result.exit_code != 0 {
            super::note_unparsed(out, &check, &result);
            continue;
        }

        let mut state = None;
        let mut failed_devices = 0u64;
        for line in result.stdout_lines() {
            let Some((label, value)) = line.split_once(':') else {
                continue;
            };
            match label.trim() {
                "State" => state = Some(value.trim().to_string()),
                "Failed Devices" => {
                    failed_devices = value.trim().parse::<u64>().unwrap_or(0);
                }
                _ => {}
            }
        }
        match state {
            Some(state) if state.contains("degraded") || state.contains("recovering") => {
                out.finding_with_evidence(
                    Severity::Warning,
                    format!("{array}: {state}"),
                    format!("mdadm --detail {device}"),
                );
            }
            Some(state) => out.finding(Severity::Info, format!("{array}: {state}")),
            None => super::note_unparsed(out, &check, &result),
        }
        if failed_devices > 0 {
            out.finding(
                Severity::Warning,
                format!("{array}: {failed_devices} failed device(s)"),
            );
        }
    }
}

fn megaraid_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::MEGARAID_CLI,
        "megaraid",
        "megacli",
        &["-LDInfo", "-Lall", "-aALL", "-NoLog"],
    ) else {
        return;
    };

    out.finding(Severity::Info, "MegaRAID controller CLI present");
    let mut states = 0usize;
    for line in result.stdout_lines() {
        let trimmed = line.trim();
        if let Some(state) = trimmed.strip_prefix("State") {
            states += 1;
            let state = state.trim_start_matches([':', ' ']).trim();
            match state {
                "Optimal" => out.finding(Severity::Info, "MegaRAID logical drive optimal"),
                s if s.contains("Degraded") || s.contains("Rebuild") => out
                    .finding_with_evidence(
                        Severity::Warning,
                        format!("MegaRAID logical drive {}", s.to_lowercase()),
                        trimmed.to_string(),
                    ),
                other => out.finding_with_evidence(
                    Severity::Warning,
                    format!("MegaRAID logical drive state: {other}"),
                    trimmed.to_string(),
                ),
            }
        }
        if let Some(count) = parse_counter(trimmed, "Media Error Count:") {
            if count > 0 {
                out.finding_with_evidence(
                    Severity::Critical,
                    format!("MegaRAID media errors detected ({count})"),
                    trimmed.to_string(),
                );
            }
        }
    }
    if states == 0 {
        super::note_unparsed(out, "megaraid", &result);
        return;
    }

    // Battery backup is a separate query; its absence is critical.
    if let Some(bbu) = run_gated(
        ctx,
        out,
        &capability::MEGARAID_CLI,
        "megaraid-bbu",
        "megacli",
        &["-AdpBbuCmd", "-GetBbuStatus", "-aALL", "-NoLog"],
    ) {
        let text = bbu.stdout.to_lowercase();
        if bbu.exit_code != 0 || text.contains("get bbu status failed") {
            out.finding_with_evidence(
                Severity::Critical,
                "MegaRAID battery backup unit missing or not responding",
                truncate_evidence(&bbu.stdout, 4),
            );
        } else if text.contains("battery state") && text.contains("optimal") {
            out.finding(Severity::Info, "MegaRAID battery backup unit healthy");
        } else if text.contains("battery state") {
            out.finding_with_evidence(
                Severity::Critical,
                "MegaRAID battery backup unit unhealthy",
                truncate_evidence(&bbu.stdout, 4),
            );
        }
    }
}

fn hp_smart_array_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::SSACLI,
        "hp-smart-array",
        "ssacli",
        &["ctrl", "all", "show", "status"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        super::note_unparsed(out, "hp-smart-array", &result);
        return;
    }

    out.finding(Severity::Info, "HP Smart Array controller CLI present");
    for line in result.stdout_lines() {
        let trimmed = line.trim();
        let Some((label, status)) = trimmed.split_once(':') else {
            continue;
        };
        let status = status.trim();
        if label.contains("Battery") || label.contains("Capacitor") {
            if status == "OK" {
                out.finding(Severity::Info, "HP controller battery/capacitor OK");
            } else {
                out.finding_with_evidence(
                    Severity::Critical,
                    format!("HP controller battery/capacitor status: {status}"),
                    trimmed.to_string(),
                );
            }
        } else if label.contains("Status") && status != "OK" {
            out.finding_with_evidence(
                Severity::Warning,
                format!("HP controller status: {status}"),
                trimmed.to_string(),
            );
        }
    }
}

fn perc_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::PERCCLI,
        "dell-perc",
        "perccli64",
        &["/call", "show"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        super::note_unparsed(out, "dell-perc", &result);
        return;
    }

    out.finding(Severity::Info, "Dell PERC controller CLI present");
    for line in result.stdout_lines() {
        let trimmed = line.trim();
        if trimmed.contains("Dgrd") || trimmed.contains("Pdgd") {
            out.finding_with_evidence(
                Severity::Warning,
                "PERC virtual drive degraded",
                trimmed.to_string(),
            );
        } else if trimmed.contains("Rbld") {
            out.finding_with_evidence(
                Severity::Warning,
                "PERC virtual drive rebuilding",
                trimmed.to_string(),
            );
        }
    }
}

fn adaptec_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::ARCCONF,
        "adaptec",
        "arcconf",
        &["GETCONFIG", "1", "LD"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        super::note_unparsed(out, "adaptec", &result);
        return;
    }

    out.finding(Severity::Info, "Adaptec controller CLI present");
    for line in result.stdout_lines() {
        let trimmed = line.trim();
        let Some((label, status)) = trimmed.split_once(':') else {
            continue;
        };
        if !label.trim().eq_ignore_ascii_case("Status of Logical Device") {
            continue;
        }
        let status = status.trim();
        if status.eq_ignore_ascii_case("Optimal") {
            out.finding(Severity::Info, "Adaptec logical device optimal");
        } else {
            out.finding_with_evidence(
                Severity::Warning,
                format!("Adaptec logical device status: {status}"),
                trimmed.to_string(),
            );
        }
    }
}

fn zpool_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::ZPOOL,
        "zfs-pools",
        "zpool",
        &["status", "-x"],
    ) else {
        return;
    };

    let text = result.stdout.trim();
    if text.is_empty() {
        super::note_unparsed(out, "zfs-pools", &result);
        return;
    }
    if text.contains("all pools are healthy") || text.contains("no pools available") {
        out.finding(Severity::Info, text.lines().next().unwrap_or(text));
        return;
    }
    if text.contains("FAULTED") || text.contains("UNAVAIL") {
        out.finding_with_evidence(
            Severity::Critical,
            "zfs pool faulted or unavailable",
            truncate_evidence(text, 8),
        );
    } else if text.contains("DEGRADED") {
        out.finding_with_evidence(
            Severity::Warning,
            "zfs pool degraded",
            truncate_evidence(text, 8),
        );
    } else {
        out.finding_with_evidence(
            Severity::Warning,
            "zfs pool not healthy",
            truncate_evidence(text, 8),
        );
    }
}

fn parse_counter(line: &str, prefix: &str) -> Option<u64> {
    line.strip_prefix(prefix)?.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{StubProbes, StubRunner, TestEnv, assert_skips_without_capabilities};
    use crate::exec::CancelToken;

    #[test]
    fn skips_entirely_without_capabilities() {
        assert_skips_without_capabilities(&RaidCollector);
    }

    #[test]
    fn missing_megaraid_cli_becomes_a_skip_not_a_finding() {
        let env = TestEnv::new(
            StubProbes::with_executables(vec!["zpool"]),
            StubRunner::new().on("zpool", 0, "all pools are healthy\n"),
        );
        let cancel = CancelToken::new();
        let result = RaidCollector.run(&env.ctx(&cancel));

        let skip = result
            .skipped
            .iter()
            .find(|s| s.reason.contains("megaraid"))
            .expect("megaraid skip reason");
        assert_eq!(skip.check, "megaraid");
        assert!(!result.findings.iter().any(|f| f.message.contains("MegaRAID")));
        assert!(result.findings.iter().any(|f| f.message.contains("healthy")));
    }

    #[test]
    fn degraded_zpool_is_a_warning_faulted_is_critical() {
        let degraded = "  pool: tank\n state: DEGRADED\nstatus: One or more devices ...\n";
        let env = TestEnv::new(
            StubProbes::with_executables(vec!["zpool"]),
            StubRunner::new().on("zpool", 0, degraded),
        );
        let cancel = CancelToken::new();
        let result = RaidCollector.run(&env.ctx(&cancel));
        assert!(result
            .findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("degraded")));

        let faulted = "  pool: tank\n state: FAULTED\n";
        let env = TestEnv::new(
            StubProbes::with_executables(vec!["zpool"]),
            StubRunner::new().on("zpool", 0, faulted),
        );
        let result = RaidCollector.run(&env.ctx(&cancel));
        assert!(result
            .findings
            .iter()
            .any(|f| f.severity == Severity::Critical));
    }

    #[test]
    fn degraded_mdstat_yields_warning() {
        let mdstat = "\
Personalities : [raid1]
md0 : active raid1 sdb1[1] sda1[0]
      1953383488 blocks super 1.2 [2/1] [U_]
unused devices: <none>
";
        let mut env = TestEnv::new(StubProbes::none(), StubRunner::new());
        env.detector = crate::capability::CapabilityDetector::new(Box::new(StubProbes {
            paths: vec!["/proc/mdstat"],
            ..StubProbes::none()
        }));
        env.files = crate::files::fixtures::FixtureFiles::new().with("/proc/mdstat", mdstat);
        let cancel = CancelToken::new();
        let result = RaidCollector.run(&env.ctx(&cancel));
        assert!(result
            .findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("degraded")));
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("1 md array(s) present")));
        assert_eq!(env.runner.call_count(), 0);
    }

    #[test]
    fn mdadm_detail_reports_degraded_state() {
        let mdstat = "Personalities : [raid1]\nmd0 : active raid1 sdb1[1] sda1[0]\n";
        let detail = "\
/dev/md0:
           Version : 1.2
             State : clean, degraded
    Failed Devices : 1
";
        let mut env = TestEnv::new(
            StubProbes {
                executables: vec!["mdadm"],
                paths: vec!["/proc/mdstat"],
                ..StubProbes::none()
            },
            StubRunner::new().on("mdadm", 0, detail),
        );
        env.files = crate::files::fixtures::FixtureFiles::new().with("/proc/mdstat", mdstat);
        let cancel = CancelToken::new();
        let result = RaidCollector.run(&env.ctx(&cancel));
        assert!(result
            .findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("degraded")));
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("1 failed device(s)")));
    }

    #[test]
    fn mdadm_failure_on_one_array_still_checks_the_rest() {
        use crate::exec::{CommandRunner, ExecutionResult, SpawnError, display_command};
        use std::time::Duration;

        // mdadm fails to start for md0 but answers for md1; the second
        // array must still get its detail pass.
        struct PerDeviceRunner;

        impl CommandRunner for PerDeviceRunner {
            fn run(
                &self,
                cmd: &str,
                args: &[&str],
                _timeout: Duration,
                _cancel: &CancelToken,
            ) -> Result<ExecutionResult, SpawnError> {
                if args.contains(&"/dev/md0") {
                    return Err(SpawnError {
                        command: display_command(cmd, args),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    });
                }
                Ok(ExecutionResult {
                    command: display_command(cmd, args),
                    exit_code: 0,
                    stdout: "/dev/md1:\n             State : clean, degraded\n    Failed Devices : 0\n"
                        .to_string(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                    timed_out: false,
                })
            }
        }

        let mdstat = "\
Personalities : [raid1]
md0 : active raid1 sdb1[1] sda1[0]
md1 : active raid1 sdd1[1] sdc1[0]
";
        let detector = crate::capability::CapabilityDetector::new(Box::new(StubProbes {
            executables: vec!["mdadm"],
            paths: vec!["/proc/mdstat"],
            ..StubProbes::none()
        }));
        let files = crate::files::fixtures::FixtureFiles::new().with("/proc/mdstat", mdstat);
        let runner = PerDeviceRunner;
        let mounts = Vec::new();
        let cancel = CancelToken::new();
        let ctx = CollectContext {
            runner: &runner,
            detector: &detector,
            files: &files,
            mounts: &mounts,
            display_server: crate::config::DisplayServer::Unknown,
            timeout: Duration::from_secs(5),
            deadline: None,
            cancel: &cancel,
        };

        let result = RaidCollector.run(&ctx);
        assert!(result.findings.iter().any(|f| {
            f.severity == Severity::Critical && f.message.contains("mdadm:md0")
        }));
        assert!(result.findings.iter().any(|f| {
            f.severity == Severity::Warning && f.message.contains("md1: clean, degraded")
        }));
    }

    #[test]
    fn missing_bbu_is_critical() {
        let ld = "Adapter 0 -- Virtual Drive Information:\nState               : Optimal\n";
        let env = TestEnv::new(
            StubProbes::with_executables(vec!["megacli"]),
            StubRunner::new()
                .on("megacli -LDInfo", 0, ld)
                .on("megacli -AdpBbuCmd", 1, "Get BBU Status Failed.\n"),
        );
        let cancel = CancelToken::new();
        let result = RaidCollector.run(&env.ctx(&cancel));
        assert!(result
            .findings
            .iter()
            .any(|f| f.severity == Severity::Critical && f.message.contains("battery")));
    }
}
