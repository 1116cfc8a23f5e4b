//! Old-kernel purge.
//!
//! The running kernel is identified by exact version equality, never by
//! substring, so `5.14.0-1` cannot shadow `5.14.0-11` and vice versa.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use super::{plural, Stage, StageContext};
use crate::error::Result;
use crate::pkg::KernelPackage;

/// One run of digits or letters in a version string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Alpha(String),
    Numeric(u64),
}

/// A kernel version compared segment by segment.
///
/// Numeric segments compare as integers (`5.15.0-100` is newer than
/// `5.15.0-20`); a numeric segment is newer than an alphabetic one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl KernelVersion {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut numeric = false;

        let mut flush = |current: &mut String, numeric: bool| {
            if current.is_empty() {
                return;
            }
            let text = std::mem::take(current);
            segments.push(match (numeric, text.parse::<u64>()) {
                (true, Ok(n)) => Segment::Numeric(n),
                _ => Segment::Alpha(text),
            });
        };

        for c in raw.chars() {
            if c.is_ascii_alphanumeric() {
                let digit = c.is_ascii_digit();
                if !current.is_empty() && digit != numeric {
                    flush(&mut current, numeric);
                }
                numeric = digit;
                current.push(c);
            } else {
                flush(&mut current, numeric);
            }
        }
        flush(&mut current, numeric);

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments
            .cmp(&other.segments)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Which kernel versions stay and which packages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPlan {
    pub running: String,
    /// Newest removable version, kept when a backup was requested
    pub backup: Option<String>,
    /// Versions to purge, oldest first
    pub removed_versions: Vec<String>,
    /// Packages belonging to the purged versions
    pub packages: Vec<String>,
}

impl KernelPlan {
    pub fn keeps(&self, version: &str) -> bool {
        version == self.running || self.backup.as_deref() == Some(version)
    }
}

/// Plan the purge of every kernel except the running one (and optionally
/// the newest other version as a backup).
pub fn plan_kernel_removal(
    installed: &[KernelPackage],
    running: &str,
    keep_backup: bool,
) -> KernelPlan {
    let mut candidates: Vec<KernelVersion> = Vec::new();
    for package in installed {
        if package.version != running && !candidates.iter().any(|v| v.as_str() == package.version) {
            candidates.push(KernelVersion::parse(&package.version));
        }
    }
    candidates.sort();

    let backup = if keep_backup {
        candidates.pop().map(|v| v.as_str().to_string())
    } else {
        None
    };
    let removed_versions: Vec<String> = candidates.iter().map(|v| v.as_str().to_string()).collect();

    let mut packages: Vec<String> = Vec::new();
    for package in installed {
        if removed_versions.contains(&package.version) && !packages.contains(&package.name) {
            packages.push(package.name.clone());
        }
    }

    KernelPlan {
        running: running.to_string(),
        backup,
        removed_versions,
        packages,
    }
}

/// Directories that hold per-kernel files, with the name prefix before the
/// kernel release.
const KERNEL_DIRS: &[(&str, &str)] = &[
    ("/lib/modules", ""),
    ("/usr/src", "linux-headers-"),
    ("/usr/src/kernels", ""),
];

pub struct KernelStage;

impl KernelStage {
    /// Kernel directories no package owns and no kept kernel uses.
    fn orphan_dirs(&self, ctx: &StageContext<'_>, plan: &KernelPlan) -> Vec<PathBuf> {
        let mut orphans = Vec::new();

        for (dir, prefix) in KERNEL_DIRS {
            let entries = match ctx.paths.list_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to list {}: {}", dir, e);
                    continue;
                }
            };

            for entry in entries.into_iter().filter(|e| e.is_dir()) {
                let name = entry.file_name().unwrap_or_default().to_string_lossy().into_owned();
                let Some(release) = name.strip_prefix(prefix) else {
                    continue;
                };
                let Some(version) = ctx.backend.kernel_version(release) else {
                    continue;
                };
                if plan.keeps(&version) {
                    continue;
                }
                if ctx.backend.owns_path(ctx.exec, &ctx.paths.host_path(&entry)) {
                    continue;
                }
                orphans.push(entry);
            }
        }

        orphans
    }
}

impl Stage for KernelStage {
    fn id(&self) -> &'static str {
        "kernels"
    }

    fn title(&self) -> &'static str {
        "Old kernel purge"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let console = ctx.console();
        let Some(running) = ctx.backend.kernel_version(&ctx.profile.kernel_release) else {
            console.warn(&format!(
                "Cannot tell which kernel version release {} belongs to; leaving kernels alone",
                ctx.profile.kernel_release
            ));
            return Ok(());
        };

        let installed = ctx.backend.kernel_packages(ctx.exec);
        let plan = plan_kernel_removal(&installed, &running, ctx.run.keep_one_backup_kernel);
        console.info(&format!("Running kernel: {}", plan.running));
        if let Some(backup) = &plan.backup {
            console.info(&format!("Keeping {} as a backup kernel", backup));
        }

        if plan.packages.is_empty() {
            console.info("No old kernel packages installed");
        } else {
            console.info(&format!(
                "Purging kernel{} {}",
                plural(plan.removed_versions.len()),
                plan.removed_versions.join(", ")
            ));
            ctx.backend.purge(ctx.exec, &plan.packages);
            ctx.backend.regenerate_bootloader(ctx.exec, ctx.paths);
        }

        for orphan in self.orphan_dirs(ctx, &plan) {
            ctx.exec.remove_path(&orphan);
        }

        let residual = ctx.backend.residual_config_packages(ctx.exec);
        if !residual.is_empty() {
            ctx.backend.purge(ctx.exec, &residual);
        }

        ctx.backend.autoremove(ctx.exec);
        Ok(())
    }
}
