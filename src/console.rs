//! Operator-facing running commentary.
//!
//! Diagnostics go through `tracing`; this is the human-readable progress
//! output, colored by severity when attached to a terminal.

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Stage,
    Info,
    Step,
    Success,
    Warn,
    Error,
    DryRun,
}

/// Where commentary is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdout,
    /// Used when stdout carries machine-readable output
    Stderr,
}

#[derive(Debug, Clone, Copy)]
pub struct Console {
    color: bool,
    quiet: bool,
    target: Target,
}

impl Console {
    /// Colors are enabled when the target is a terminal and `NO_COLOR` is unset.
    pub fn new(target: Target, quiet: bool) -> Self {
        let tty = match target {
            Target::Stdout => io::stdout().is_tty(),
            Target::Stderr => io::stderr().is_tty(),
        };
        Self {
            color: tty && std::env::var_os("NO_COLOR").is_none(),
            quiet,
            target,
        }
    }

    /// Uncolored stdout output, as used by tests.
    pub fn plain() -> Self {
        Self {
            color: false,
            quiet: false,
            target: Target::Stdout,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.color
    }

    pub fn stage(&self, title: &str) {
        self.emit(Level::Stage, title);
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    pub fn step(&self, message: &str) {
        self.emit(Level::Step, message);
    }

    pub fn success(&self, message: &str) {
        self.emit(Level::Success, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }

    pub fn dry_run(&self, message: &str) {
        self.emit(Level::DryRun, message);
    }

    fn format(&self, level: Level, message: &str) -> String {
        let (tag, indent) = match level {
            Level::Stage => ("==>", ""),
            Level::Info => ("[INFO]", ""),
            Level::Step => ("->", "  "),
            Level::Success => ("[ OK ]", ""),
            Level::Warn => ("[WARN]", ""),
            Level::Error => ("[FAIL]", ""),
            Level::DryRun => ("[dry-run]", "  "),
        };

        if !self.color {
            return format!("{}{} {}", indent, tag, message);
        }

        let tag = match level {
            Level::Stage => tag.blue().bold().to_string(),
            Level::Info => tag.cyan().to_string(),
            Level::Step => tag.dark_grey().to_string(),
            Level::Success => tag.green().to_string(),
            Level::Warn => tag.yellow().to_string(),
            Level::Error => tag.red().bold().to_string(),
            Level::DryRun => tag.magenta().to_string(),
        };
        let message = match level {
            Level::Stage => message.bold().to_string(),
            _ => message.to_string(),
        };
        format!("{}{} {}", indent, tag, message)
    }

    fn emit(&self, level: Level, message: &str) {
        if self.quiet && matches!(level, Level::Stage | Level::Info | Level::Step) {
            return;
        }

        let line = self.format(level, message);
        let to_stderr =
            self.target == Target::Stderr || matches!(level, Level::Warn | Level::Error);

        // Commentary is best-effort; a closed pipe must not abort the cleanup.
        let _ = if to_stderr {
            writeln!(io::stderr().lock(), "{}", line)
        } else {
            writeln!(io::stdout().lock(), "{}", line)
        };
    }
}
