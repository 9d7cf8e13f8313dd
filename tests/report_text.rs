use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

fn hwdoctor_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hwdoctor"));
    cmd.env("HOME", home);
    cmd.env_remove("HWDOCTOR_CONFIG");
    cmd.env_remove("HWDOCTOR_RUN_TIMEOUT_SECS");
    cmd.env_remove("HWDOCTOR_RUN_JOBS");
    cmd.env_remove("HWDOCTOR_REPORT_COLOR");
    cmd.env_remove("HWDOCTOR_REPORT_INCLUDE_EVIDENCE");
    cmd.env_remove("HWDOCTOR_GRAPHICS_DISPLAY_SERVER");
    cmd.env_remove("XDG_SESSION_TYPE");
    cmd
}

fn make_temp_home(tag: &str) -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("hwdoctor-text-{tag}-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn install_fake_tool(bin_dir: &Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(bin_dir).expect("mkdir bin");
    let path = bin_dir.join(name);
    std::fs::write(&path, script).expect("write tool");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
}

#[test]
fn text_report_has_section_headers_and_skip_lines() {
    let home = make_temp_home("sections");
    let out = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", home.join("empty-bin"));
        cmd.args(["--no-color", "all"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    for section in ["raid", "storage", "graphics", "network", "system", "logs"] {
        assert!(stdout.contains(&format!("== {section} ==")), "stdout={stdout}");
    }
    assert!(stdout.contains("(skipped:"), "stdout={stdout}");
    // Not a tty, so no ANSI escapes even without --no-color.
    assert!(!stdout.contains('\u{1b}'), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn quiet_suppresses_the_text_report() {
    let home = make_temp_home("quiet");
    let out = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", home.join("empty-bin"));
        cmd.args(["--quiet", "logs"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn evidence_lines_only_appear_with_the_evidence_flag() {
    let home = make_temp_home("evidence");
    let bin_dir = home.join("bin");
    install_fake_tool(
        &bin_dir,
        "zpool",
        "#!/bin/sh\necho \"  pool: tank\"\necho \" state: DEGRADED\"\nexit 0\n",
    );

    let plain = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", &bin_dir);
        cmd.args(["raid"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(plain.status.success());
    let plain_out = String::from_utf8_lossy(&plain.stdout);
    assert!(plain_out.contains("[warning] zfs pool degraded"), "stdout={plain_out}");
    assert!(!plain_out.contains("state: DEGRADED"), "stdout={plain_out}");

    let with_evidence = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", &bin_dir);
        cmd.args(["--evidence", "raid"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(with_evidence.status.success());
    let verbose_out = String::from_utf8_lossy(&with_evidence.stdout);
    assert!(verbose_out.contains("state: DEGRADED"), "stdout={verbose_out}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn timeout_turns_a_hanging_tool_into_a_warning() {
    use std::time::{Duration, Instant};

    let home = make_temp_home("timeout");
    let bin_dir = home.join("bin");
    // PATH holds only the fake tools, so the hang cannot rely on an
    // external binary like sleep.
    install_fake_tool(&bin_dir, "zpool", "#!/bin/sh\nread x < /dev/zero\nexit 0\n");

    let start = Instant::now();
    let out = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", &bin_dir);
        cmd.args(["--timeout", "1", "raid"]);
        cmd.output().expect("run hwdoctor")
    };
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_secs(10),
        "raid took too long: elapsed={elapsed:?}\nstderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("check timed out"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}
