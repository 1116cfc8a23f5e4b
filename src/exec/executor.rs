//! Dry-run aware executor: the one place host state is mutated.

use chrono::Local;
use serde::Serialize;
use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::console::Console;
use crate::error::{Result, SweeperError};

/// Result of a single mutating action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action ran and succeeded.
    Done { action: String, stdout: String },
    /// The action ran and failed. Soft failure unless the caller escalates.
    Failed { action: String, error: String },
    /// The action was not performed (dry-run, or nothing to do).
    Skipped { action: String, reason: String },
}

impl ActionOutcome {
    pub fn action(&self) -> &str {
        match self {
            ActionOutcome::Done { action, .. }
            | ActionOutcome::Failed { action, .. }
            | ActionOutcome::Skipped { action, .. } => action,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ActionOutcome::Done { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }

    /// Escalate a failure into an error. Skipped actions count as success.
    pub fn into_result(self) -> Result<Self> {
        match self {
            ActionOutcome::Failed { action, error } => Err(SweeperError::Command {
                command: action,
                message: error,
            }),
            other => Ok(other),
        }
    }

    pub fn skipped(action: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionOutcome::Skipped {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Counters of actions handled by an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionStats {
    pub done: usize,
    pub failed: usize,
    /// Actions reported but not performed because of dry-run
    pub planned: usize,
}

impl ActionStats {
    /// Counters accumulated since an earlier snapshot.
    pub fn since(&self, earlier: &ActionStats) -> ActionStats {
        ActionStats {
            done: self.done - earlier.done,
            failed: self.failed - earlier.failed,
            planned: self.planned - earlier.planned,
        }
    }
}

/// Executor through which every mutating command and file operation passes.
///
/// In dry-run mode actions are reported and nothing is changed. Read-only
/// inspection goes through [`Executor::query`], which always runs.
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    console: Console,
    stats: Cell<ActionStats>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("dry_run", &self.dry_run)
            .field("stats", &self.stats.get())
            .finish()
    }
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, dry_run: bool, console: Console) -> Self {
        Self {
            runner,
            dry_run,
            console,
            stats: Cell::new(ActionStats::default()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn stats(&self) -> ActionStats {
        self.stats.get()
    }

    pub fn has_program(&self, program: &str) -> bool {
        self.runner.exists(program)
    }

    /// Run a read-only command. A non-zero exit is returned, not an error.
    pub fn query(&self, command: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(%command, "query");
        self.runner
            .run(command)
            .map_err(|e| SweeperError::Command {
                command: command.to_string(),
                message: e.to_string(),
            })
    }

    /// Stdout of a successful read-only command, `None` on any failure.
    pub fn query_stdout(&self, command: &CommandSpec) -> Option<String> {
        match self.query(command) {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                tracing::debug!(%command, reason = %output.failure_message(), "query failed");
                None
            }
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        }
    }

    /// Run a mutating command.
    pub fn run(&self, command: &CommandSpec) -> ActionOutcome {
        let action = command.to_string();
        if self.dry_run {
            return self.plan(format!("would run: {}", action), action);
        }

        self.console.step(&action);
        match self.runner.run(command) {
            Ok(output) if output.success() => self.done(action, output.stdout),
            Ok(output) => self.failed(action, output.failure_message()),
            Err(e) => self.failed(action, e.to_string()),
        }
    }

    /// Delete a file, symlink or directory tree. Absent paths are a no-op.
    pub fn remove_path(&self, path: &Path) -> ActionOutcome {
        let action = format!("remove {}", path.display());
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return ActionOutcome::skipped(action, "not present"),
        };
        if self.dry_run {
            return self.plan(format!("would remove {}", path.display()), action);
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        self.settle(action, result)
    }

    /// Delete everything inside a directory, keeping the directory itself.
    pub fn clear_dir(&self, dir: &Path) -> ActionOutcome {
        let action = format!("clear {}", dir.display());
        let entries = match fs::read_dir(dir) {
            Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect::<Vec<_>>(),
            Err(_) => return ActionOutcome::skipped(action, "not present"),
        };
        if entries.is_empty() {
            return ActionOutcome::skipped(action, "already empty");
        }
        if self.dry_run {
            return self.plan(
                format!("would delete {} entries in {}", entries.len(), dir.display()),
                action,
            );
        }

        let mut first_error = None;
        for entry in &entries {
            let result = match fs::symlink_metadata(entry) {
                Ok(m) if m.is_dir() => fs::remove_dir_all(entry),
                Ok(_) => fs::remove_file(entry),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!("Failed to remove {}: {}", entry.display(), e);
                first_error.get_or_insert_with(|| format!("{}: {}", entry.display(), e));
            }
        }

        match first_error {
            None => self.done(action, String::new()),
            Some(error) => self.failed(action, error),
        }
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, path: &Path, contents: &str) -> ActionOutcome {
        let action = format!("write {}", path.display());
        if self.dry_run {
            return self.plan(
                format!("would write {} bytes to {}", contents.len(), path.display()),
                action,
            );
        }

        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(path, contents));
        self.settle(action, result)
    }

    /// Keep only the last `keep` bytes of a file.
    pub fn truncate_to_tail(&self, path: &Path, keep: u64) -> ActionOutcome {
        let action = format!("truncate {}", path.display());
        let len = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return ActionOutcome::skipped(action, "not present"),
        };
        if len <= keep {
            return ActionOutcome::skipped(action, "already small enough");
        }
        if self.dry_run {
            return self.plan(
                format!(
                    "would truncate {} from {} to its last {} bytes",
                    path.display(),
                    humansize::format_size(len, humansize::BINARY),
                    keep
                ),
                action,
            );
        }

        let result = keep_tail(path, len, keep);
        self.settle(action, result)
    }

    /// Copy a file to `<file>.bak-<timestamp>` before editing it.
    pub fn backup_file(&self, path: &Path) -> ActionOutcome {
        let action = format!("back up {}", path.display());
        if !path.is_file() {
            return ActionOutcome::skipped(action, "not present");
        }
        let backup = backup_path(path);
        if self.dry_run {
            return self.plan(
                format!("would back up {} to {}", path.display(), backup.display()),
                action,
            );
        }

        let result = fs::copy(path, &backup).map(|_| ());
        if result.is_ok() {
            tracing::info!("Backed up {} to {}", path.display(), backup.display());
        }
        self.settle(action, result)
    }

    fn plan(&self, message: String, action: String) -> ActionOutcome {
        self.console.dry_run(&message);
        self.bump(|s| s.planned += 1);
        ActionOutcome::skipped(action, "dry-run")
    }

    fn settle(&self, action: String, result: io::Result<()>) -> ActionOutcome {
        match result {
            Ok(()) => {
                tracing::debug!("{}", action);
                self.done(action, String::new())
            }
            Err(e) => self.failed(action, e.to_string()),
        }
    }

    fn done(&self, action: String, stdout: String) -> ActionOutcome {
        self.bump(|s| s.done += 1);
        ActionOutcome::Done { action, stdout }
    }

    fn failed(&self, action: String, error: String) -> ActionOutcome {
        self.console.warn(&format!("{} failed: {}", action, error));
        tracing::warn!(%action, %error, "action failed");
        self.bump(|s| s.failed += 1);
        ActionOutcome::Failed { action, error }
    }

    fn bump(&self, f: impl FnOnce(&mut ActionStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

/// `<file>.bak-YYYYmmddHHMMSS`
pub fn backup_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d%H%M%S");
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".bak-{}", stamp));
    path.with_file_name(name)
}

fn keep_tail(path: &Path, len: u64, keep: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(len - keep))?;
    let mut tail = Vec::with_capacity(keep as usize);
    file.read_to_end(&mut tail)?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&tail)?;
    file.flush()
}
