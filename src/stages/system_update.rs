use super::{Stage, StageContext};
use crate::error::Result;

/// Refresh metadata, upgrade, then drop what the upgrade orphaned.
pub struct SystemUpdateStage;

impl Stage for SystemUpdateStage {
    fn id(&self) -> &'static str {
        "system-update"
    }

    fn title(&self) -> &'static str {
        "System update"
    }

    fn enabled(&self, ctx: &StageContext<'_>) -> bool {
        ctx.run.do_system_update
    }

    fn skip_reason(&self) -> &'static str {
        "disabled by --no-update"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let update = ctx.backend.update(ctx.exec);
        if update.is_failed() {
            ctx.console()
                .warn("Metadata refresh failed; upgrading from cached metadata");
        }
        let upgrade = ctx.backend.upgrade(ctx.exec);
        ctx.backend.autoremove(ctx.exec);

        if upgrade.is_done() {
            ctx.console().success("System packages are up to date");
        }
        Ok(())
    }
}
