use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::files::FileSource;

/// Filesystem types the storage collector knows how to check. Anything
/// else is carried as `Unsupported` and reported, never dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsKind {
    Btrfs,
    Zfs,
    Xfs,
    Ext,
    Vfat,
    Unsupported(String),
}

impl FsKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "btrfs" => FsKind::Btrfs,
            "zfs" => FsKind::Zfs,
            "xfs" => FsKind::Xfs,
            "ext2" | "ext3" | "ext4" => FsKind::Ext,
            "vfat" | "exfat" | "msdos" => FsKind::Vfat,
            other => FsKind::Unsupported(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_name: String,
    pub fs: FsKind,
}

const PSEUDO_FS: &[&str] = &[
    "proc",
    "sysfs",
    "devtmpfs",
    "devpts",
    "tmpfs",
    "cgroup",
    "cgroup2",
    "securityfs",
    "pstore",
    "bpf",
    "tracefs",
    "debugfs",
    "configfs",
    "fusectl",
    "mqueue",
    "hugetlbfs",
    "autofs",
    "binfmt_misc",
    "overlay",
    "squashfs",
    "ramfs",
    "rpc_pipefs",
    "nsfs",
];

/// Parses `/proc/mounts`-format text, keeping only real filesystems.
pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(fs_name)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if PSEUDO_FS.contains(&fs_name) {
            continue;
        }
        entries.push(MountEntry {
            device: device.to_string(),
            mount_point: PathBuf::from(unescape_mount_path(mount_point)),
            fs_name: fs_name.to_string(),
            fs: FsKind::from_name(fs_name),
        });
    }
    entries
}

pub fn load_mounts(files: &dyn FileSource, path: &Path) -> Result<Vec<MountEntry>> {
    let text = files
        .read_to_string(path)
        .with_context(|| format!("failed to read mount table: {}", path.display()))?;
    Ok(parse_mounts(&text))
}

// /proc/mounts escapes space, tab, newline and backslash as octal.
fn unescape_mount_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 && digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}
