//! Cleanup stages.
//!
//! This module provides:
//! - The [`Stage`] trait every cleanup step implements
//! - [`StageContext`], the immutable view of the run handed to each stage
//! - [`StageRegistry`] with the canonical stage order
//! - [`run_stages`], which runs a registry and records one report per stage

pub mod caches;
pub mod cloud_init;
pub mod devtools;
pub mod distro_extra;
pub mod final_sweep;
pub mod gai;
pub mod journal;
pub mod kernels;
pub mod locale;
pub mod logs;
mod orchestrator;
mod registry;
pub mod snap;
pub mod swap;
pub mod system_update;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{run_stages, summarize, StageReport, StageStatus, SweepSummary};
pub use registry::StageRegistry;
pub use snap::{Clock, SystemClock};

use std::fs::Metadata;
use std::time::{Duration, SystemTime};

use crate::config::{Config, RunConfig};
use crate::console::Console;
use crate::error::Result;
use crate::exec::Executor;
use crate::host::{HostPaths, HostProfile};
use crate::pkg::PackageBackend;

/// Everything a stage may read. Built once per run; stages never mutate it.
pub struct StageContext<'a> {
    pub profile: &'a HostProfile,
    pub run: &'a RunConfig,
    pub config: &'a Config,
    pub paths: &'a HostPaths,
    pub backend: &'a dyn PackageBackend,
    pub exec: &'a Executor,
    pub clock: &'a dyn Clock,
}

impl StageContext<'_> {
    pub fn console(&self) -> &Console {
        self.exec.console()
    }
}

/// One self-contained cleanup operation in the fixed pipeline.
///
/// Stages are best-effort: individual action failures are reported by the
/// executor and do not end the stage. Returning `Err` marks the stage as
/// failed; the pipeline still moves on to the next one.
pub trait Stage {
    /// Unique identifier (e.g. "snap", "kernels"), as accepted by `--skip`.
    fn id(&self) -> &'static str;

    /// Human-readable title for the stage banner.
    fn title(&self) -> &'static str;

    /// Whether the stage applies to this host and run.
    fn enabled(&self, _ctx: &StageContext<'_>) -> bool {
        true
    }

    /// Reason shown when [`Stage::enabled`] is false.
    fn skip_reason(&self) -> &'static str {
        "not applicable"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()>;
}

/// Get all stages in canonical order.
pub fn all_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(system_update::SystemUpdateStage),
        Box::new(locale::LocaleStage),
        Box::new(journal::JournalStage),
        Box::new(logs::LogTrimStage),
        Box::new(devtools::DevToolsStage),
        Box::new(caches::CacheStage),
        Box::new(swap::SwapStage),
        Box::new(snap::SnapStage),
        Box::new(gai::GaiStage),
        Box::new(cloud_init::CloudInitStage),
        Box::new(kernels::KernelStage),
        Box::new(distro_extra::DistroExtraStage),
        Box::new(final_sweep::FinalSweepStage),
    ]
}

/// Whether a file was last modified more than `age` ago.
pub(crate) fn is_older_than(metadata: &Metadata, age: Duration, now: SystemTime) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

pub(crate) fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

pub(crate) fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
