//! Plain-text log trimming under /var/log.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use super::{days, is_older_than, Stage, StageContext};
use crate::config::LogConfig;
use crate::error::Result;

const LOG_DIR: &str = "/var/log";
const COMPRESSED_EXTENSIONS: &[&str] = &["gz", "xz", "bz2", "zst", "lz4", "zip"];

/// What to do with one log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogAction {
    /// Keep only the newest bytes
    Truncate(PathBuf),
    Delete(PathBuf),
}

fn is_compressed(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| COMPRESSED_EXTENSIONS.contains(&e))
}

/// Decide the fate of every regular file under `log_dir`.
///
/// The journal's own storage (`<log_dir>/journal`) is never touched; it is
/// managed through journald.
pub fn plan_log_trim(log_dir: &Path, policy: &LogConfig, now: SystemTime) -> Vec<LogAction> {
    let journal = log_dir.join("journal");
    let compressed_age = days(policy.compressed_max_age_days);
    let mut actions = Vec::new();

    let walker = WalkDir::new(log_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.path() != journal);

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Failed to stat {}: {}", path.display(), e);
                continue;
            }
        };

        if path.extension().is_some_and(|e| e == "old") {
            actions.push(LogAction::Delete(path.to_path_buf()));
        } else if is_compressed(path) {
            if is_older_than(&metadata, compressed_age, now) {
                actions.push(LogAction::Delete(path.to_path_buf()));
            }
        } else if metadata.len() > policy.max_file_bytes {
            actions.push(LogAction::Truncate(path.to_path_buf()));
        }
    }

    actions
}

pub struct LogTrimStage;

impl Stage for LogTrimStage {
    fn id(&self) -> &'static str {
        "logs"
    }

    fn title(&self) -> &'static str {
        "Log trimming"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let policy = &ctx.config.logs;
        let actions = plan_log_trim(&ctx.paths.resolve(LOG_DIR), policy, SystemTime::now());

        let (mut truncated, mut deleted) = (0, 0);
        for action in &actions {
            match action {
                LogAction::Truncate(path) => {
                    if ctx.exec.truncate_to_tail(path, policy.max_file_bytes).is_done() {
                        truncated += 1;
                    }
                }
                LogAction::Delete(path) => {
                    if ctx.exec.remove_path(path).is_done() {
                        deleted += 1;
                    }
                }
            }
        }

        if truncated + deleted > 0 {
            ctx.console().success(&format!(
                "Truncated {} and deleted {} log files",
                truncated, deleted
            ));
        } else if actions.is_empty() {
            ctx.console().info("Logs are already within limits");
        }
        Ok(())
    }
}
