use super::{Stage, StageContext};
use crate::error::Result;
use crate::exec::CommandSpec;

const SERVICES: &[&str] = &["cloud-init-local", "cloud-init", "cloud-config", "cloud-final"];

/// Network configuration generated by cloud-init; kept as a backup because
/// the host may still depend on it after the package is gone.
const GENERATED_NETWORK_CONFIG: &[&str] = &[
    "/etc/netplan/50-cloud-init.yaml",
    "/etc/sysconfig/network-scripts/ifcfg-eth0",
];

const STATE_PATHS: &[&str] = &[
    "/etc/cloud",
    "/var/lib/cloud",
    "/var/log/cloud-init.log",
    "/var/log/cloud-init-output.log",
];

pub struct CloudInitStage;

impl Stage for CloudInitStage {
    fn id(&self) -> &'static str {
        "cloud-init"
    }

    fn title(&self) -> &'static str {
        "cloud-init removal"
    }

    fn enabled(&self, ctx: &StageContext<'_>) -> bool {
        ctx.run.remove_cloud_init
    }

    fn skip_reason(&self) -> &'static str {
        "kept by --keep-cloud-init"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        for service in SERVICES {
            ctx.exec
                .run(&CommandSpec::new("systemctl").args(["stop", *service]));
        }

        if ctx.exec.has_program("cloud-init") {
            ctx.exec
                .run(&CommandSpec::new("cloud-init").args(["clean", "--logs", "--seed"]));
        }

        for config in GENERATED_NETWORK_CONFIG {
            ctx.exec.backup_file(&ctx.paths.resolve(config));
        }

        let packages = ctx.backend.list_installed(ctx.exec, "cloud-init*");
        if packages.is_empty() {
            ctx.console().info("No cloud-init packages installed");
        } else {
            ctx.backend.purge(ctx.exec, &packages);
        }

        for path in STATE_PATHS {
            ctx.exec.remove_path(&ctx.paths.resolve(path));
        }

        for service in SERVICES {
            ctx.exec
                .run(&CommandSpec::new("systemctl").args(["disable", *service]));
        }
        Ok(())
    }
}
