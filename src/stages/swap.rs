//! Swap removal.
//!
//! Swap files are disabled and deleted. Swap partitions are only disabled:
//! repartitioning is left to the operator.

use std::fs;

use super::{Stage, StageContext};
use crate::error::Result;
use crate::exec::CommandSpec;

const FSTAB: &str = "/etc/fstab";
const SWAP_FILES: &[&str] = &["/swapfile", "/swap.img"];

/// An active swap area as reported by `swapon --show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapArea {
    pub name: String,
    /// "file" or "partition"
    pub kind: String,
}

pub fn parse_swapon(stdout: &str) -> Vec<SwapArea> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(SwapArea {
                name: parts.next()?.to_string(),
                kind: parts.next()?.to_string(),
            })
        })
        .collect()
}

fn is_swap_entry(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.starts_with('#') && trimmed.split_whitespace().nth(2) == Some("swap")
}

/// Comment out every active swap entry. `None` when there is nothing to change.
pub fn comment_out_swap(fstab: &str) -> Option<String> {
    if !fstab.lines().any(is_swap_entry) {
        return None;
    }

    let mut out = String::with_capacity(fstab.len() + 16);
    for line in fstab.lines() {
        if is_swap_entry(line) {
            out.push_str("# ");
        }
        out.push_str(line);
        out.push('\n');
    }
    Some(out)
}

pub struct SwapStage;

impl SwapStage {
    fn disable_fstab_entries(&self, ctx: &StageContext<'_>) {
        let fstab = ctx.paths.resolve(FSTAB);
        let contents = match fs::read_to_string(&fstab) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", FSTAB, e);
                return;
            }
        };

        if let Some(updated) = comment_out_swap(&contents) {
            if ctx.exec.backup_file(&fstab).is_failed() {
                ctx.console()
                    .warn("Leaving /etc/fstab untouched because the backup failed");
                return;
            }
            ctx.exec.write_file(&fstab, &updated);
        }
    }
}

impl Stage for SwapStage {
    fn id(&self) -> &'static str {
        "swap"
    }

    fn title(&self) -> &'static str {
        "Swap removal"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let show = CommandSpec::new("swapon").args(["--show=NAME,TYPE", "--noheadings"]);
        let active = ctx
            .exec
            .query_stdout(&show)
            .map(|out| parse_swapon(&out))
            .unwrap_or_default();

        if !active.is_empty() {
            ctx.exec.run(&CommandSpec::new("swapoff").arg("-a"));
        }
        for area in active.iter().filter(|a| a.kind == "partition") {
            ctx.console().warn(&format!(
                "Swap partition {} was disabled but not deleted; remove it manually",
                area.name
            ));
        }

        for host_path in SWAP_FILES {
            let path = ctx.paths.resolve(host_path);
            if !path.exists() {
                continue;
            }
            if ctx.exec.has_program("chattr") {
                ctx.exec
                    .run(&CommandSpec::new("chattr").args(["-i", *host_path]));
            }
            ctx.exec.remove_path(&path);
        }

        self.disable_fstab_entries(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use crate::exec::CommandOutput;
    use crate::host::PackageManagerKind;
    use crate::stages::testing::Fixture;

    const FSTAB_SAMPLE: &str = "\
# /etc/fstab: static file system information.
UUID=1234 / ext4 defaults 0 1
/swapfile none swap sw 0 0
#/dev/sdb1 none swap sw 0 0
UUID=9abc none swap sw 0 0
";

    #[test]
    fn test_parse_swapon() {
        let areas = parse_swapon("/swapfile file\n/dev/sda2 partition\n");
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[1].kind, "partition");
        assert!(parse_swapon("").is_empty());
    }

    #[test]
    fn test_comment_out_swap() {
        let updated = comment_out_swap(FSTAB_SAMPLE).unwrap();
        insta::assert_snapshot!(updated.trim_end(), @r"
        # /etc/fstab: static file system information.
        UUID=1234 / ext4 defaults 0 1
        # /swapfile none swap sw 0 0
        #/dev/sdb1 none swap sw 0 0
        # UUID=9abc none swap sw 0 0
        ");
        assert_eq!(comment_out_swap(&updated), None);
    }

    #[test]
    fn test_swapfile_removed_and_fstab_backed_up() {
        let runner = RecordingRunner::new()
            .with_program("chattr")
            .respond("swapon", CommandOutput::ok("/swapfile file\n"));
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, false);
        fixture.write("/swapfile", "swap");
        fixture.write(FSTAB, FSTAB_SAMPLE);

        SwapStage.run(&fixture.ctx()).unwrap();

        assert!(!fixture.exists("/swapfile"));
        assert!(fixture.runner.called("swapoff -a"));
        assert!(fixture.runner.called("chattr -i /swapfile"));
        assert!(fixture.read(FSTAB).contains("# /swapfile none swap"));

        let backups = fs::read_dir(fixture.path("/etc"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("fstab.bak-"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_partition_is_only_disabled() {
        let runner =
            RecordingRunner::new().respond("swapon", CommandOutput::ok("/dev/sda2 partition\n"));
        let fixture = Fixture::new(PackageManagerKind::Dnf, runner, false);

        SwapStage.run(&fixture.ctx()).unwrap();

        assert_eq!(fixture.runner.calls(), vec!["swapon --show=NAME,TYPE --noheadings", "swapoff -a"]);
    }

    #[test]
    fn test_no_swap_is_a_noop() {
        let fixture = Fixture::new(PackageManagerKind::Apt, RecordingRunner::new(), false);
        SwapStage.run(&fixture.ctx()).unwrap();

        assert_eq!(fixture.runner.calls(), vec!["swapon --show=NAME,TYPE --noheadings"]);
        assert_eq!(fixture.exec.stats().done, 0);
    }
}
