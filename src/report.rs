//! Disk usage before and after a sweep.

use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use serde::Serialize;

use crate::console::Console;
use crate::error::Result;

/// Disk usage of the filesystem holding a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStatus {
    /// Path the filesystem was queried through (e.g. "/")
    pub mount_point: PathBuf,

    /// Total capacity in bytes
    pub total: u64,

    /// Used space in bytes
    pub used: u64,

    /// Space available to unprivileged users in bytes
    pub available: u64,

    /// Usage percentage (0.0 - 100.0)
    pub percent: f32,
}

impl DiskStatus {
    pub fn used_human(&self) -> String {
        humansize::format_size(self.used, humansize::BINARY)
    }

    pub fn total_human(&self) -> String {
        humansize::format_size(self.total, humansize::BINARY)
    }

    pub fn available_human(&self) -> String {
        humansize::format_size(self.available, humansize::BINARY)
    }
}

/// Check disk usage for a specific path
pub fn check_disk_usage(path: &Path) -> Result<DiskStatus> {
    let stat = statvfs(path)?;

    let block_size = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * block_size;
    let available = stat.blocks_available() as u64 * block_size;
    let free = stat.blocks_free() as u64 * block_size;

    // Reserved blocks count as free, not as used
    let used = total.saturating_sub(free);

    let usable_total = used + available;
    let percent = if usable_total > 0 {
        (used as f64 / usable_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    Ok(DiskStatus {
        mount_point: path.to_path_buf(),
        total,
        used,
        available,
        percent,
    })
}

/// Usage snapshots taken around the sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskReport {
    pub before: DiskStatus,
    pub after: DiskStatus,
}

impl DiskReport {
    /// Bytes released by the sweep; negative when usage grew (e.g. through
    /// the system upgrade).
    pub fn freed(&self) -> i64 {
        self.before.used as i64 - self.after.used as i64
    }

    pub fn freed_human(&self) -> String {
        let freed = self.freed();
        let size = humansize::format_size(freed.unsigned_abs(), humansize::BINARY);
        if freed < 0 {
            format!("-{}", size)
        } else {
            size
        }
    }
}

pub fn print_status(console: &Console, label: &str, status: &DiskStatus) {
    console.info(&format!(
        "{}: {} used of {} ({:.1}%), {} available on {}",
        label,
        status.used_human(),
        status.total_human(),
        status.percent,
        status.available_human(),
        status.mount_point.display()
    ));
}
