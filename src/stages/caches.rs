//! Package manager and per-user tool cache clearing.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use super::{days, is_older_than, Stage, StageContext};
use crate::error::Result;

/// Tool caches relative to a home directory.
const TOOL_CACHES: &[&str] = &[
    ".cache/pip",
    ".npm/_cacache",
    ".cache/yarn",
    ".local/share/pnpm/store",
    ".cache/go-build",
    ".cargo/registry/cache",
    ".gradle/caches",
    ".cache/composer",
    ".composer/cache",
    ".cache/JetBrains",
    ".vscode-server/data/CachedExtensionVSIXs",
];

const THUMBNAIL_CACHES: &[&str] = &[".cache/thumbnails", ".thumbnails"];

/// Files under `~/.cache` not modified within `max_age`.
pub fn stale_cache_files(home: &Path, max_age_days: u64, now: SystemTime) -> Vec<PathBuf> {
    let cache = home.join(".cache");
    if !cache.is_dir() {
        return Vec::new();
    }
    let max_age = days(max_age_days);

    WalkDir::new(&cache)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.metadata()
                .map(|m| is_older_than(&m, max_age, now))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

pub struct CacheStage;

impl CacheStage {
    fn clear_home(&self, ctx: &StageContext<'_>, home: &Path) -> usize {
        let extra = ctx.config.caches.extra_paths.iter().map(String::as_str);
        let mut removed = 0;

        let targets = TOOL_CACHES
            .iter()
            .copied()
            .chain(extra)
            .chain(THUMBNAIL_CACHES.iter().copied());
        for rel in targets {
            if ctx.exec.remove_path(&home.join(rel)).is_done() {
                removed += 1;
            }
        }

        for file in stale_cache_files(home, ctx.config.caches.max_age_days, SystemTime::now()) {
            if ctx.exec.remove_path(&file).is_done() {
                removed += 1;
            }
        }
        removed
    }
}

impl Stage for CacheStage {
    fn id(&self) -> &'static str {
        "caches"
    }

    fn title(&self) -> &'static str {
        "Cache clearing"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.backend.clean(ctx.exec, ctx.paths);

        let homes = ctx.paths.home_dirs();
        let mut removed = 0;
        for home in &homes {
            tracing::debug!(home = %home.display(), "Clearing user caches");
            removed += self.clear_home(ctx, home);
        }

        ctx.console().success(&format!(
            "Cleared {} cache entr{} across {} home director{}",
            removed,
            if removed == 1 { "y" } else { "ies" },
            homes.len(),
            if homes.len() == 1 { "y" } else { "ies" }
        ));
        Ok(())
    }
}
