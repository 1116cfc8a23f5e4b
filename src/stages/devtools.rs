use super::{plural, Stage, StageContext};
use crate::error::Result;
use crate::host::{DistroFamily, HostProfile};

const DEBIAN_DEVTOOLS: &[&str] = &[
    "build-essential",
    "gcc",
    "g++",
    "cpp",
    "make",
    "cmake",
    "autoconf",
    "automake",
    "libtool",
    "pkg-config",
    "gdb",
    "strace",
    "ltrace",
    "valgrind",
    "clang",
    "llvm",
    "golang-go",
    "rustc",
    "cargo",
    "default-jdk",
    "maven",
    "gradle",
    "python3-dev",
    "python3-pip",
    "nodejs",
    "npm",
    "linux-headers-generic",
];

const RPM_DEVTOOLS: &[&str] = &[
    "gcc",
    "gcc-c++",
    "cpp",
    "make",
    "cmake",
    "autoconf",
    "automake",
    "libtool",
    "pkgconf",
    "gdb",
    "strace",
    "ltrace",
    "valgrind",
    "clang",
    "llvm",
    "golang",
    "rust",
    "cargo",
    "maven",
    "python3-devel",
    "python3-pip",
    "nodejs",
    "npm",
    "kernel-headers",
];

const DEV_GROUP: &str = "Development Tools";

/// Development packages to look for on this host, in removal order.
///
/// Includes the running kernel's headers; they are only needed to build
/// out-of-tree modules.
pub fn devtool_candidates(profile: &HostProfile, extra: &[String]) -> Vec<String> {
    let (base, headers) = match profile.family {
        DistroFamily::DebianLike => (DEBIAN_DEVTOOLS, "linux-headers"),
        DistroFamily::RpmLike => (RPM_DEVTOOLS, "kernel-devel"),
    };

    let mut candidates: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    candidates.push(format!("{}-{}", headers, profile.kernel_release));
    candidates.extend(extra.iter().cloned());
    candidates
}

pub struct DevToolsStage;

impl Stage for DevToolsStage {
    fn id(&self) -> &'static str {
        "devtools"
    }

    fn title(&self) -> &'static str {
        "Development tool purge"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let candidates = devtool_candidates(ctx.profile, &ctx.config.devtools.extra_packages);
        let installed = ctx.backend.installed_subset(ctx.exec, &candidates);

        if installed.is_empty() {
            ctx.console().info("No development packages installed");
        } else {
            ctx.console().info(&format!(
                "Removing {} development package{}",
                installed.len(),
                plural(installed.len())
            ));
            ctx.backend.purge(ctx.exec, installed.as_slice());
        }

        if let Some(outcome) = ctx.backend.remove_group(ctx.exec, DEV_GROUP) {
            tracing::debug!(?outcome, "Package group removal");
        }
        ctx.backend.autoremove(ctx.exec);
        Ok(())
    }
}
