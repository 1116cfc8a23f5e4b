use super::journal::vacuum_journal;
use super::{Stage, StageContext};
use crate::error::Result;

/// Directories whose contents are discarded; the directories themselves stay.
const SCRATCH_DIRS: &[&str] = &["/tmp", "/var/tmp", "/var/crash", "/var/lib/systemd/coredump"];

pub struct FinalSweepStage;

impl Stage for FinalSweepStage {
    fn id(&self) -> &'static str {
        "final-sweep"
    }

    fn title(&self) -> &'static str {
        "Final sweep"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        vacuum_journal(ctx.exec);

        for dir in SCRATCH_DIRS {
            ctx.exec.clear_dir(&ctx.paths.resolve(dir));
        }
        Ok(())
    }
}
