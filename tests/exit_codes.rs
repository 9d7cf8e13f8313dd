use std::path::{Path, PathBuf};
use std::process::{Command, Output};
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

fn run(home: &Path, args: &[&str]) -> Output {
    hwdoctor_cmd(home).args(args).output().expect("run hwdoctor")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("hwdoctor-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

#[test]
fn benchmark_unknown_kind_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["benchmark", "quantum"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid benchmark kind"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn benchmark_zero_duration_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["benchmark", "system", "--duration", "0"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn benchmark_interval_longer_than_duration_exits_2() {
    let home = make_temp_home();
    let out = run(
        &home,
        &["benchmark", "system", "--duration", "2", "--interval", "5"],
    );
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn zero_timeout_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--timeout", "0", "logs"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("timeout"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_bash_succeeds() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("hwdoctor"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_show_succeeds_without_a_config_file() {
    let home = make_temp_home();
    let out = run(&home, &["config", "--show"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("timeout_secs"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_without_show_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["config"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn collectors_succeed_even_when_every_tool_is_missing() {
    let home = make_temp_home();
    // Empty PATH: every vendor CLI is absent, so everything skips.
    let out = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", home.join("empty-bin"));
        cmd.args(["all"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn critical_findings_still_exit_0() {
    use std::os::unix::fs::PermissionsExt;

    let home = make_temp_home();
    let bin_dir = home.join("bin");
    std::fs::create_dir_all(&bin_dir).expect("mkdir bin");

    let script = r#"#!/bin/sh
echo "  pool: tank"
echo " state: FAULTED"
exit 0
"#;
    let path = bin_dir.join("zpool");
    std::fs::write(&path, script).expect("write zpool");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");

    let out = {
        let mut cmd = hwdoctor_cmd(&home);
        cmd.env("PATH", &bin_dir);
        cmd.args(["raid"]);
        cmd.output().expect("run hwdoctor")
    };
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("[critical]"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}
