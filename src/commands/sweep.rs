//! Sweep command implementation.

use nix::unistd::Uid;
use serde::Serialize;
use std::sync::Arc;

use crate::cli::Cli;
use crate::config::{Config, RunConfig};
use crate::console::{Console, Target};
use crate::error::{Result, SweeperError};
use crate::exec::{CommandRunner, Executor, SystemRunner};
use crate::host::{detect, running_kernel_release, HostPaths};
use crate::pkg::backend_for;
use crate::report::{check_disk_usage, print_status, DiskReport, DiskStatus};
use crate::stages::{
    run_stages, summarize, Clock, StageContext, StageRegistry, StageReport, StageStatus,
    SweepSummary, SystemClock,
};

/// Options for one sweep, taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub run: RunConfig,
    /// Stage ids to leave out
    pub skip: Vec<String>,
    pub json: bool,
    pub quiet: bool,
}

impl SweepOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            run: cli.run_config(),
            skip: cli.skip.clone(),
            json: cli.json,
            quiet: cli.quiet,
        }
    }
}

/// The machine being swept.
pub struct Host {
    pub paths: HostPaths,
    pub runner: Arc<dyn CommandRunner>,
    /// Release of the running kernel, as `uname -r` prints it
    pub kernel_release: String,
}

impl Host {
    /// The machine this process runs on.
    pub fn local() -> Result<Self> {
        Ok(Self {
            paths: HostPaths::new("/"),
            runner: Arc::new(SystemRunner::new()),
            kernel_release: running_kernel_release()?,
        })
    }
}

/// Everything a finished sweep reports, as printed by `--json`.
#[derive(Debug, Serialize)]
pub struct SweepOutcome {
    pub host: String,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
    pub summary: SweepSummary,
    pub disk: Option<DiskReport>,
    pub freed_bytes: Option<i64>,
}

/// Refuse to run without root privileges.
pub fn require_root() -> Result<()> {
    ensure_root(nix::unistd::geteuid())
}

fn ensure_root(euid: Uid) -> Result<()> {
    if !euid.is_root() {
        return Err(SweeperError::NotRoot(euid.as_raw()));
    }
    Ok(())
}

/// Run the sweep on the local machine.
pub fn run(options: &SweepOptions, config: &Config) -> Result<SweepOutcome> {
    require_root()?;
    let host = Host::local()?;
    sweep(&host, options, config, &SystemClock::new())
}

/// Run the sweep on a host.
///
/// Only unsupported hosts fail; everything past detection is best-effort and
/// ends up in the returned outcome.
pub fn sweep(
    host: &Host,
    options: &SweepOptions,
    config: &Config,
    clock: &dyn Clock,
) -> Result<SweepOutcome> {
    let target = if options.json {
        Target::Stderr
    } else {
        Target::Stdout
    };
    let console = Console::new(target, options.quiet);

    let profile = detect(&host.paths, host.runner.as_ref(), &host.kernel_release)?;
    console.info(&format!("Host: {}", profile));
    if options.run.dry_run {
        console.info("Dry run: nothing will be changed");
    }

    let registry = registry_for(&options.skip, &console);
    let exec = Executor::new(host.runner.clone(), options.run.dry_run, console);
    let backend = backend_for(&profile);

    let before = disk_status(&host.paths, &console);
    if let Some(status) = &before {
        print_status(&console, "Disk before", status);
    }

    let ctx = StageContext {
        profile: &profile,
        run: &options.run,
        config,
        paths: &host.paths,
        backend: backend.as_ref(),
        exec: &exec,
        clock,
    };
    let reports = run_stages(&registry, &ctx);
    let summary = summarize(&reports);

    let after = disk_status(&host.paths, &console);
    let disk = match (before, after) {
        (Some(before), Some(after)) => Some(DiskReport { before, after }),
        _ => None,
    };

    print_summary(&console, &reports, &summary, disk.as_ref());

    let outcome = SweepOutcome {
        host: profile.to_string(),
        dry_run: options.run.dry_run,
        freed_bytes: disk.as_ref().map(DiskReport::freed),
        stages: reports,
        summary,
        disk,
    };

    Ok(outcome)
}

/// Registry minus `--skip` ids. Unknown ids are reported, not fatal.
fn registry_for(skip: &[String], console: &Console) -> StageRegistry {
    let known = StageRegistry::new().ids();
    let unknown: Vec<&str> = skip
        .iter()
        .map(String::as_str)
        .filter(|id| !known.contains(id))
        .collect();
    if !unknown.is_empty() {
        console.warn(&format!(
            "Ignoring unknown stage id(s): {} (valid: {})",
            unknown.join(", "),
            known.join(", ")
        ));
    }

    let skip: Vec<&str> = skip.iter().map(String::as_str).collect();
    StageRegistry::without_ids(&skip)
}

fn disk_status(paths: &HostPaths, console: &Console) -> Option<DiskStatus> {
    match check_disk_usage(paths.root()) {
        Ok(status) => Some(status),
        Err(e) => {
            console.warn(&format!("Cannot read disk usage: {}", e));
            None
        }
    }
}

fn print_summary(
    console: &Console,
    reports: &[StageReport],
    summary: &SweepSummary,
    disk: Option<&DiskReport>,
) {
    console.stage("Summary");

    for report in reports {
        let actions = &report.actions;
        match &report.status {
            StageStatus::Completed => console.success(&format!(
                "{}: {} done, {} failed, {} planned",
                report.title, actions.done, actions.failed, actions.planned
            )),
            StageStatus::Failed(error) => {
                console.error(&format!("{}: {}", report.title, error));
            }
            StageStatus::Skipped(reason) => {
                console.info(&format!("{}: skipped ({})", report.title, reason));
            }
        }
    }

    if let Some(disk) = disk {
        print_status(console, "Disk after", &disk.after);
        console.success(&format!("Freed {}", disk.freed_human()));
    }

    console.info(&format!(
        "{} stage(s) completed, {} failed, {} skipped; {} action(s) failed",
        summary.completed, summary.failed, summary.skipped, summary.actions.failed
    ));
}
