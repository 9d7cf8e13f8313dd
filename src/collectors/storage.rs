use crate::capability::{self, Capability};
use crate::collectors::{CollectContext, Collector, note_unparsed, run_gated, truncate_evidence};
use crate::core::{CollectorResult, Severity};
use crate::mounts::{FsKind, MountEntry};

const USAGE_WARNING_PCT: u32 = 90;
const USAGE_CRITICAL_PCT: u32 = 98;

/// Walks the mount table and dispatches a filesystem-specific health
/// check per entry, then SMART and disk-usage checks.
pub struct StorageCollector;

impl Collector for StorageCollector {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![
            capability::BTRFS,
            capability::ZPOOL,
            capability::XFS_INFO,
            capability::TUNE2FS,
            capability::SMARTCTL,
            capability::DF,
        ]
    }

    fn collect(&self, ctx: &CollectContext, out: &mut CollectorResult) {
        for mount in ctx.mounts {
            check_mount(ctx, out, mount);
        }
        smart_check(ctx, out);
        usage_check(ctx, out);
    }
}

fn check_mount(ctx: &CollectContext, out: &mut CollectorResult, mount: &MountEntry) {
    match &mount.fs {
        FsKind::Btrfs => btrfs_check(ctx, out, mount),
        FsKind::Zfs => zfs_check(ctx, out, mount),
        FsKind::Xfs => xfs_check(ctx, out, mount),
        FsKind::Ext => ext_check(ctx, out, mount),
        FsKind::Vfat => out.finding(
            Severity::Info,
            format!(
                "{}: vfat has no online health check",
                mount.mount_point.display()
            ),
        ),
        FsKind::Unsupported(name) => out.finding(
            Severity::Info,
            format!(
                "{}: unsupported filesystem type {name}",
                mount.mount_point.display()
            ),
        ),
    }
}

fn btrfs_check(ctx: &CollectContext, out: &mut CollectorResult, mount: &MountEntry) {
    let mount_s = mount.mount_point.display().to_string();
    let check = format!("btrfs:{mount_s}");
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::BTRFS,
        &check,
        "btrfs",
        &["device", "stats", mount_s.as_str()],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, &check, &result);
        return;
    }

    let mut corruption = 0u64;
    let mut io_errors = 0u64;
    for line in result.stdout_lines() {
        let Some((counter, value)) = line.rsplit_once(' ') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        if counter.contains("corruption_errs") {
            corruption += value;
        } else if counter.contains("_errs") {
            io_errors += value;
        }
    }
    if corruption > 0 {
        out.finding_with_evidence(
            Severity::Critical,
            format!("{mount_s}: btrfs corruption errors ({corruption})"),
            truncate_evidence(&result.stdout, 8),
        );
    } else if io_errors > 0 {
        out.finding_with_evidence(
            Severity::Warning,
            format!("{mount_s}: btrfs device errors ({io_errors})"),
            truncate_evidence(&result.stdout, 8),
        );
    } else {
        out.finding(Severity::Info, format!("{mount_s}: btrfs device stats clean"));
    }
}

fn zfs_check(ctx: &CollectContext, out: &mut CollectorResult, mount: &MountEntry) {
    // Device is pool[/dataset]; status is per pool.
    let pool = mount.device.split('/').next().unwrap_or(&mount.device);
    let check = format!("zfs:{pool}");
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::ZPOOL,
        &check,
        "zpool",
        &["status", "-x", pool],
    ) else {
        return;
    };

    let text = result.stdout.trim();
    if text.contains("is healthy") {
        out.finding(Severity::Info, format!("pool '{pool}' is healthy"));
    } else if text.contains("FAULTED") || text.contains("UNAVAIL") {
        out.finding_with_evidence(
            Severity::Critical,
            format!("pool '{pool}' faulted or unavailable"),
            truncate_evidence(text, 8),
        );
    } else if text.contains("DEGRADED") {
        out.finding_with_evidence(
            Severity::Warning,
            format!("pool '{pool}' degraded"),
            truncate_evidence(text, 8),
        );
    } else {
        note_unparsed(out, &check, &result);
    }
}

fn xfs_check(ctx: &CollectContext, out: &mut CollectorResult, mount: &MountEntry) {
    let mount_s = mount.mount_point.display().to_string();
    let check = format!("xfs:{mount_s}");
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::XFS_INFO,
        &check,
        "xfs_info",
        &[mount_s.as_str()],
    ) else {
        return;
    };
    if result.exit_code == 0 && result.stdout.contains("meta-data") {
        out.finding(Severity::Info, format!("{mount_s}: xfs geometry readable"));
    } else {
        note_unparsed(out, &check, &result);
    }
}

fn ext_check(ctx: &CollectContext, out: &mut CollectorResult, mount: &MountEntry) {
    let check = format!("ext:{}", mount.device);
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::TUNE2FS,
        &check,
        "tune2fs",
        &["-l", mount.device.as_str()],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, &check, &result);
        return;
    }

    let mut state = None;
    let mut mount_count = None;
    let mut max_mount_count = None;
    for line in result.stdout_lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim() {
            "Filesystem state" => state = Some(value.to_string()),
            "Mount count" => mount_count = value.parse::<i64>().ok(),
            "Maximum mount count" => max_mount_count = value.parse::<i64>().ok(),
            _ => {}
        }
    }

    match state.as_deref() {
        Some("clean") => out.finding(
            Severity::Info,
            format!("{}: ext filesystem state clean", mount.device),
        ),
        Some(other) => out.finding_with_evidence(
            Severity::Critical,
            format!("{}: ext filesystem state '{other}'", mount.device),
            format!("tune2fs -l {}", mount.device),
        ),
        None => {
            note_unparsed(out, &check, &result);
            return;
        }
    }

    if let (Some(count), Some(max)) = (mount_count, max_mount_count) {
        // max <= 0 means periodic fsck is disabled.
        if max > 0 && count >= max {
            out.finding(
                Severity::Warning,
                format!(
                    "{}: mount count {count} reached maximum {max}, fsck due",
                    mount.device
                ),
            );
        }
    }
}

fn smart_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(scan) = run_gated(
        ctx,
        out,
        &capability::SMARTCTL,
        "smart-scan",
        "smartctl",
        &["--scan"],
    ) else {
        return;
    };

    let devices: Vec<String> = scan
        .stdout_lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|dev| dev.starts_with("/dev/"))
        .map(str::to_string)
        .collect();
    if devices.is_empty() {
        out.finding(Severity::Info, "smartctl found no SMART-capable devices");
        return;
    }

    for device in devices {
        let check = format!("smart:{device}");
        let Some(result) = run_gated(
            ctx,
            out,
            &capability::SMARTCTL,
            &check,
            "smartctl",
            &["-H", device.as_str()],
        ) else {
            continue;
        };
        let text = result.stdout.as_str();
        if text.contains("PASSED") || text.contains("SMART Health Status: OK") {
            out.finding(Severity::Info, format!("{device}: SMART health passed"));
        } else if text.contains("FAILED") {
            out.finding_with_evidence(
                Severity::Critical,
                format!("{device}: SMART health failed"),
                truncate_evidence(text, 6),
            );
        } else {
            note_unparsed(out, &check, &result);
        }
    }
}

fn usage_check(ctx: &CollectContext, out: &mut CollectorResult) {
    let Some(result) = run_gated(
        ctx,
        out,
        &capability::DF,
        "disk-usage",
        "df",
        &["-P", "-k"],
    ) else {
        return;
    };
    if result.exit_code != 0 {
        note_unparsed(out, "disk-usage", &result);
        return;
    }

    for line in result.stdout_lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || !fields[0].starts_with("/dev/") {
            continue;
        }
        let Some(pct) = fields[4].strip_suffix('%').and_then(|p| p.parse::<u32>().ok()) else {
            continue;
        };
        let mount_point = fields[5];
        if pct >= USAGE_CRITICAL_PCT {
            out.finding_with_evidence(
                Severity::Critical,
                format!("{mount_point}: filesystem {pct}% full"),
                line.to_string(),
            );
        } else if pct >= USAGE_WARNING_PCT {
            out.finding_with_evidence(
                Severity::Warning,
                format!("{mount_point}: filesystem {pct}% full"),
                line.to_string(),
            );
        }
    }
}
