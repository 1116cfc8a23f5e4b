//! journald retention policy.

use super::{Stage, StageContext};
use crate::error::Result;
use crate::exec::{ActionOutcome, CommandSpec, Executor};

pub const JOURNALD_DROPIN: &str = "/etc/systemd/journald.conf.d/00-vm-sweeper.conf";

const MAX_USE: &str = "1M";
const MAX_RETENTION: &str = "1day";
const VACUUM_TIME: &str = "1d";

/// Contents of the journald drop-in.
pub fn journald_dropin() -> String {
    format!(
        "# Managed by vm-sweeper\n\
         [Journal]\n\
         SystemMaxUse={max}\n\
         SystemMaxFileSize={max}\n\
         RuntimeMaxUse={max}\n\
         RuntimeMaxFileSize={max}\n\
         MaxRetentionSec={retention}\n",
        max = MAX_USE,
        retention = MAX_RETENTION
    )
}

/// Force journal retention by time, then by size.
pub(crate) fn vacuum_journal(exec: &Executor) -> Vec<ActionOutcome> {
    if !exec.has_program("journalctl") {
        tracing::debug!("journalctl not available; skipping vacuum");
        return Vec::new();
    }
    vec![
        exec.run(&CommandSpec::new("journalctl").arg(format!("--vacuum-time={}", VACUUM_TIME))),
        exec.run(&CommandSpec::new("journalctl").arg(format!("--vacuum-size={}", MAX_USE))),
    ]
}

pub struct JournalStage;

impl Stage for JournalStage {
    fn id(&self) -> &'static str {
        "journal"
    }

    fn title(&self) -> &'static str {
        "Journal retention"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let dropin = ctx.paths.resolve(JOURNALD_DROPIN);
        let contents = journald_dropin();

        if std::fs::read_to_string(&dropin).ok().as_deref() == Some(contents.as_str()) {
            tracing::debug!("{} already in place", JOURNALD_DROPIN);
        } else if !ctx.exec.write_file(&dropin, &contents).is_failed() {
            ctx.exec.run(
                &CommandSpec::new("systemctl")
                    .args(["restart", "systemd-journald"]),
            );
        }
        vacuum_journal(ctx.exec);
        Ok(())
    }
}
