//! Free-space lookups for the storage volume.

use std::{io, path::Path};

/// Reports how many bytes are available on the volume holding `path`.
pub trait DiskSpace: Send + Sync {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the filesystem holding `path` directly (statvfs), so
/// tmpfs and network mounts report their own free space.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs4::available_space(path)
    }
}

/// Always reports the same figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub u64);

impl DiskSpace for FixedDiskSpace {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}
