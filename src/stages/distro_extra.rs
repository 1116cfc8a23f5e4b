//! RPM-family extras: rescue images and stray package files.

use std::path::PathBuf;
use walkdir::WalkDir;

use super::{plural, Stage, StageContext};
use crate::error::Result;

const RESCUE_PACKAGE: &str = "dracut-config-rescue";
const RPM_CACHES: &[&str] = &["/var/cache/dnf", "/var/cache/yum"];

/// `/boot` entries belonging to the dracut rescue image.
fn rescue_boot_entries(ctx: &StageContext<'_>) -> Vec<PathBuf> {
    let mut entries = Vec::new();
    for (dir, marker) in [("/boot", "-0-rescue-"), ("/boot/loader/entries", "-0-rescue")] {
        match ctx.paths.list_dir(dir) {
            Ok(found) => entries.extend(found.into_iter().filter(|p| {
                p.is_file()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().contains(marker))
            })),
            Err(e) => tracing::warn!("Failed to list {}: {}", dir, e),
        }
    }
    entries
}

/// Downloaded `*.rpm` files left in the package manager caches.
fn stray_rpm_files(ctx: &StageContext<'_>) -> Vec<PathBuf> {
    RPM_CACHES
        .iter()
        .map(|dir| ctx.paths.resolve(dir))
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .flatten()
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rpm"))
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .collect()
}

pub struct DistroExtraStage;

impl Stage for DistroExtraStage {
    fn id(&self) -> &'static str {
        "distro-extra"
    }

    fn title(&self) -> &'static str {
        "Distribution extras"
    }

    fn enabled(&self, ctx: &StageContext<'_>) -> bool {
        ctx.profile.is_rpm_like()
    }

    fn skip_reason(&self) -> &'static str {
        "only applies to RPM-family hosts"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let console = ctx.console();

        let unneeded = ctx.backend.unneeded_packages(ctx.exec);
        if !unneeded.is_empty() {
            console.info(&format!(
                "{} package{} no longer needed (left installed): {}",
                unneeded.len(),
                plural(unneeded.len()),
                unneeded.join(", ")
            ));
        }

        if ctx.backend.is_installed(ctx.exec, RESCUE_PACKAGE) {
            ctx.backend.remove(ctx.exec, &[RESCUE_PACKAGE.to_string()]);
        }
        for entry in rescue_boot_entries(ctx) {
            ctx.exec.remove_path(&entry);
        }

        for file in stray_rpm_files(ctx) {
            ctx.exec.remove_path(&file);
        }
        ctx.backend.clean(ctx.exec, ctx.paths);
        Ok(())
    }
}
