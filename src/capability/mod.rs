use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// How a capability is detected in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Executable(&'static str),
    PathExists(&'static str),
    KernelModule(&'static str),
    ProcessRunning(&'static str),
}

/// A detectable precondition gating a check: an external tool, a
/// special file, a loaded module or a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub name: &'static str,
    pub probe: Probe,
}

pub const MDSTAT: Capability = cap("mdstat", Probe::PathExists("/proc/mdstat"));
pub const MDADM: Capability = cap("mdadm", Probe::Executable("mdadm"));
pub const MEGARAID_CLI: Capability = cap("megaraid-cli", Probe::Executable("megacli"));
pub const SSACLI: Capability = cap("ssacli", Probe::Executable("ssacli"));
pub const PERCCLI: Capability = cap("perccli", Probe::Executable("perccli64"));
pub const ARCCONF: Capability = cap("arcconf", Probe::Executable("arcconf"));
pub const ZPOOL: Capability = cap("zpool", Probe::Executable("zpool"));
pub const ZFS_MODULE: Capability = cap("zfs-module", Probe::KernelModule("zfs"));
pub const BTRFS: Capability = cap("btrfs", Probe::Executable("btrfs"));
pub const XFS_INFO: Capability = cap("xfs_info", Probe::Executable("xfs_info"));
pub const TUNE2FS: Capability = cap("tune2fs", Probe::Executable("tune2fs"));
pub const SMARTCTL: Capability = cap("smartctl", Probe::Executable("smartctl"));
pub const DF: Capability = cap("df", Probe::Executable("df"));
pub const LSPCI: Capability = cap("lspci", Probe::Executable("lspci"));
pub const NVIDIA_SMI: Capability = cap("nvidia-smi", Probe::Executable("nvidia-smi"));
pub const AMDGPU_SYSFS: Capability = cap(
    "amdgpu-sysfs",
    Probe::PathExists("/sys/class/drm/card0/device/gpu_busy_percent"),
);
pub const XORG: Capability = cap("xorg", Probe::ProcessRunning("Xorg"));
pub const XRANDR: Capability = cap("xrandr", Probe::Executable("xrandr"));
pub const IP: Capability = cap("ip", Probe::Executable("ip"));
pub const ETHTOOL: Capability = cap("ethtool", Probe::Executable("ethtool"));
pub const SENSORS: Capability = cap("sensors", Probe::Executable("sensors"));
pub const SYSTEMCTL: Capability = cap("systemctl", Probe::Executable("systemctl"));
pub const DMESG: Capability = cap("dmesg", Probe::Executable("dmesg"));
pub const JOURNALCTL: Capability = cap("journalctl", Probe::Executable("journalctl"));
pub const DD: Capability = cap("dd", Probe::Executable("dd"));
pub const FIO: Capability = cap("fio", Probe::Executable("fio"));
pub const GLMARK2: Capability = cap("glmark2", Probe::Executable("glmark2"));
pub const STRESS_NG: Capability = cap("stress-ng", Probe::Executable("stress-ng"));
pub const DISKSTATS: Capability = cap("diskstats", Probe::PathExists("/proc/diskstats"));
pub const PROC_LOADAVG: Capability = cap("proc-loadavg", Probe::PathExists("/proc/loadavg"));
pub const PROC_MEMINFO: Capability = cap("proc-meminfo", Probe::PathExists("/proc/meminfo"));

const fn cap(name: &'static str, probe: Probe) -> Capability {
    Capability { name, probe }
}

/// Everything detectable, for `hwdoctor capabilities`.
pub fn known_capabilities() -> Vec<Capability> {
    vec![
        MDSTAT,
        MDADM,
        MEGARAID_CLI,
        SSACLI,
        PERCCLI,
        ARCCONF,
        ZPOOL,
        ZFS_MODULE,
        BTRFS,
        XFS_INFO,
        TUNE2FS,
        SMARTCTL,
        DF,
        LSPCI,
        NVIDIA_SMI,
        AMDGPU_SYSFS,
        XORG,
        XRANDR,
        IP,
        ETHTOOL,
        SENSORS,
        SYSTEMCTL,
        DMESG,
        JOURNALCTL,
        DD,
        FIO,
        GLMARK2,
        STRESS_NG,
        DISKSTATS,
        PROC_LOADAVG,
        PROC_MEMINFO,
    ]
}

/// Environment probes, injectable so tests run against fixtures
/// instead of the live machine.
pub trait Probes: Sync {
    fn executable_on_path(&self, name: &str) -> bool;
    fn path_exists(&self, path: &Path) -> bool;
    fn module_loaded(&self, name: &str) -> bool;
    fn process_running(&self, name: &str) -> bool;
}

/// Live probes. The search path is captured once at construction, so
/// detection never reads the process environment afterwards.
pub struct SystemProbes {
    path_dirs: Vec<PathBuf>,
    proc_root: PathBuf,
}

impl SystemProbes {
    pub fn from_env() -> Self {
        let path_dirs = std::env::var_os("PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        Self {
            path_dirs,
            proc_root: PathBuf::from("/proc"),
        }
    }

    pub fn with_paths(path_dirs: Vec<PathBuf>, proc_root: PathBuf) -> Self {
        Self {
            path_dirs,
            proc_root,
        }
    }
}

impl Probes for SystemProbes {
    fn executable_on_path(&self, name: &str) -> bool {
        self.path_dirs.iter().any(|dir| {
            let candidate = dir.join(name);
            candidate.is_file() && is_executable(&candidate)
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn module_loaded(&self, name: &str) -> bool {
        let Ok(modules) = std::fs::read_to_string(self.proc_root.join("modules")) else {
            return false;
        };
        modules
            .lines()
            .any(|line| line.split_whitespace().next() == Some(name))
    }

    fn process_running(&self, name: &str) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.proc_root) else {
            return false;
        };
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                if comm.trim() == name {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

/// Memoizing front door for capability detection. Entries are
/// write-once per run; `refresh` is only for use between independent
/// runs so a single run keeps a self-consistent view.
pub struct CapabilityDetector {
    probes: Box<dyn Probes + Send + Sync>,
    cache: Mutex<HashMap<&'static str, bool>>,
}

impl CapabilityDetector {
    pub fn new(probes: Box<dyn Probes + Send + Sync>) -> Self {
        Self {
            probes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn has(&self, capability: &Capability) -> bool {
        let mut cache = self.cache.lock().expect("capability cache poisoned");
        if let Some(present) = cache.get(capability.name) {
            return *present;
        }
        let present = match capability.probe {
            Probe::Executable(name) => self.probes.executable_on_path(name),
            Probe::PathExists(path) => self.probes.path_exists(Path::new(path)),
            Probe::KernelModule(name) => self.probes.module_loaded(name),
            Probe::ProcessRunning(name) => self.probes.process_running(name),
        };
        cache.insert(capability.name, present);
        present
    }

    pub fn refresh(&self) {
        self.cache
            .lock()
            .expect("capability cache poisoned")
            .clear();
    }
}
