//! RPM-family backend (dnf or yum + rpm).

use std::path::Path;

use super::{nothing_to_do, KernelPackage, PackageBackend, PackageSet};
use crate::exec::{ActionOutcome, CommandSpec, Executor};
use crate::host::{HostPaths, PackageManagerKind};

/// Install-only kernel packages; several versions coexist.
const KERNEL_PACKAGES: &[&str] = &[
    "kernel",
    "kernel-core",
    "kernel-modules",
    "kernel-modules-core",
    "kernel-modules-extra",
    "kernel-devel",
    "kernel-devel-matched",
];

const GRUB_CFG: &str = "/boot/grub2/grub.cfg";

/// Backend for dnf and yum hosts.
#[derive(Debug)]
pub struct RpmBackend {
    kind: PackageManagerKind,
}

impl RpmBackend {
    pub fn new(kind: PackageManagerKind) -> Self {
        debug_assert!(kind != PackageManagerKind::Apt);
        Self { kind }
    }

    fn front_end(&self) -> CommandSpec {
        CommandSpec::new(self.kind.binary())
    }

    fn with_names(&self, exec: &Executor, verb: &str, names: &[String]) -> ActionOutcome {
        if names.is_empty() {
            return nothing_to_do(verb);
        }
        exec.run(
            &self
                .front_end()
                .args(["-y", verb])
                .args(names.iter().cloned()),
        )
    }

    fn lines(exec: &Executor, command: &CommandSpec) -> Vec<String> {
        match exec.query(command) {
            Ok(output) => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        }
    }
}

/// Drop rpm's "package foo is not installed" lines.
fn is_package_line(line: &str) -> bool {
    !line.contains(' ')
}

impl PackageBackend for RpmBackend {
    fn kind(&self) -> PackageManagerKind {
        self.kind
    }

    fn install(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        self.with_names(exec, "install", names)
    }

    fn remove(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        self.with_names(exec, "remove", names)
    }

    fn reinstall(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        self.with_names(exec, "reinstall", names)
    }

    fn autoremove(&self, exec: &Executor) -> ActionOutcome {
        exec.run(&self.front_end().args(["-y", "autoremove"]))
    }

    fn clean(&self, exec: &Executor, paths: &HostPaths) -> Vec<ActionOutcome> {
        let cache_dir = match self.kind {
            PackageManagerKind::Yum => "/var/cache/yum",
            _ => "/var/cache/dnf",
        };
        vec![
            exec.run(&self.front_end().args(["clean", "all"])),
            exec.clear_dir(&paths.resolve(cache_dir)),
        ]
    }

    fn update(&self, exec: &Executor) -> ActionOutcome {
        exec.run(&self.front_end().args(["-y", "makecache"]))
    }

    fn upgrade(&self, exec: &Executor) -> ActionOutcome {
        let verb = match self.kind {
            PackageManagerKind::Yum => "update",
            _ => "upgrade",
        };
        exec.run(&self.front_end().args(["-y", verb]))
    }

    fn installed_subset(&self, exec: &Executor, candidates: &[String]) -> PackageSet {
        if candidates.is_empty() {
            return PackageSet::new();
        }
        let command = CommandSpec::new("rpm")
            .args(["-q", "--qf", "%{NAME}\\n"])
            .args(candidates.iter().cloned());
        let installed: Vec<String> = Self::lines(exec, &command)
            .into_iter()
            .filter(|l| is_package_line(l))
            .collect();

        candidates
            .iter()
            .filter(|c| installed.contains(c))
            .cloned()
            .collect()
    }

    fn list_installed(&self, exec: &Executor, pattern: &str) -> Vec<String> {
        let command = CommandSpec::new("rpm")
            .args(["-qa", "--qf", "%{NAME}\\n"])
            .arg(pattern);
        let set: PackageSet = Self::lines(exec, &command)
            .into_iter()
            .filter(|l| is_package_line(l))
            .collect();
        set.as_slice().to_vec()
    }

    fn kernel_packages(&self, exec: &Executor) -> Vec<KernelPackage> {
        let command = CommandSpec::new("rpm")
            .args(["-q", "--qf", "%{NAME} %{VERSION}-%{RELEASE}.%{ARCH}\\n"])
            .args(KERNEL_PACKAGES.iter().copied());

        Self::lines(exec, &command)
            .iter()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let release = parts.next()?;
                if parts.next().is_some() || !release.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                Some(KernelPackage {
                    name: format!("{}-{}", name, release),
                    version: release.to_string(),
                })
            })
            .collect()
    }

    /// `uname -r` on RPM hosts is exactly `VERSION-RELEASE.ARCH`.
    fn kernel_version(&self, release: &str) -> Option<String> {
        let release = release.trim();
        (!release.is_empty()).then(|| release.to_string())
    }

    fn owns_path(&self, exec: &Executor, host_path: &Path) -> bool {
        let command = CommandSpec::new("rpm")
            .arg("-qf")
            .arg(host_path.to_string_lossy().into_owned());
        exec.query_stdout(&command).is_some()
    }

    fn remove_group(&self, exec: &Executor, group: &str) -> Option<ActionOutcome> {
        let (list, remove) = match self.kind {
            PackageManagerKind::Yum => (
                CommandSpec::new("yum").args(["grouplist", "installed"]),
                CommandSpec::new("yum").args(["-y", "groupremove"]).arg(group),
            ),
            _ => (
                CommandSpec::new("dnf").args(["group", "list", "--installed"]),
                CommandSpec::new("dnf")
                    .args(["-y", "group", "remove"])
                    .arg(group),
            ),
        };

        let installed = exec.query_stdout(&list)?;
        let wanted = group.to_lowercase();
        if !installed
            .lines()
            .any(|line| line.trim().to_lowercase() == wanted)
        {
            tracing::debug!(group, "Package group not installed");
            return None;
        }
        Some(exec.run(&remove))
    }

    fn regenerate_bootloader(&self, exec: &Executor, paths: &HostPaths) -> ActionOutcome {
        if !exec.has_program("grub2-mkconfig") {
            return ActionOutcome::skipped("grub2-mkconfig", "grub2-mkconfig not available");
        }
        if !paths.resolve(GRUB_CFG).is_file() {
            return ActionOutcome::skipped("grub2-mkconfig", format!("{} not present", GRUB_CFG));
        }
        exec.run(&CommandSpec::new("grub2-mkconfig").args(["-o", GRUB_CFG]))
    }

    fn unneeded_packages(&self, exec: &Executor) -> Vec<String> {
        let command = match self.kind {
            PackageManagerKind::Yum => {
                if !exec.has_program("package-cleanup") {
                    return Vec::new();
                }
                CommandSpec::new("package-cleanup").args(["--leaves", "--quiet"])
            }
            _ => CommandSpec::new("dnf").args(["repoquery", "--unneeded", "--qf", "%{name}"]),
        };
        match exec.query_stdout(&command) {
            Some(stdout) => stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && is_package_line(l))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }
}
