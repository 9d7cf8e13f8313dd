use std::io;
use std::path::Path;

/// Read-only view of proc/sysfs style files, injectable so collectors
/// can be exercised against fixtures instead of live hardware paths.
pub trait FileSource: Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemFiles;

impl FileSource for SystemFiles {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}
