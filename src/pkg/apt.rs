//! Debian-family backend (apt-get + dpkg).

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::{nothing_to_do, KernelPackage, PackageBackend, PackageSet};
use crate::exec::{ActionOutcome, CommandSpec, Executor};
use crate::host::{HostPaths, PackageManagerKind};

const STATUS_FORMAT: &str = "--showformat=${db:Status-Abbrev} ${Package}\\n";
const KERNEL_PATTERNS: &[&str] = &["linux-image-*", "linux-modules-*", "linux-headers-*"];

/// Backend for apt-get/dpkg hosts.
#[derive(Debug, Default)]
pub struct AptBackend;

impl AptBackend {
    pub fn new() -> Self {
        Self
    }

    fn apt_get(&self) -> CommandSpec {
        CommandSpec::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .arg("-y")
    }

    /// `(status, package)` pairs from dpkg-query for the given patterns.
    fn status_rows(&self, exec: &Executor, patterns: &[String]) -> Vec<(String, String)> {
        if patterns.is_empty() {
            return Vec::new();
        }
        let command = CommandSpec::new("dpkg-query")
            .arg("-W")
            .arg(STATUS_FORMAT)
            .args(patterns.iter().cloned());

        // dpkg-query exits non-zero when one pattern matches nothing but still
        // prints the rows it found.
        match exec.query(&command) {
            Ok(output) => parse_status_rows(&output.stdout),
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        }
    }
}

fn parse_status_rows(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let status = parts.next()?;
            let name = parts.next()?;
            Some((status.to_string(), name.to_string()))
        })
        .collect()
}

/// dpkg abbreviated status: second character `i` means installed.
fn is_installed_status(status: &str) -> bool {
    status.chars().nth(1) == Some('i')
}

fn abi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+(?:\.\d+)?-\d+").expect("valid kernel ABI regex"))
}

/// ABI version (`5.15.0-20`) inside a package name or `uname -r` release.
pub(crate) fn kernel_abi(text: &str) -> Option<String> {
    abi_regex().find(text).map(|m| m.as_str().to_string())
}

impl PackageBackend for AptBackend {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    fn install(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        if names.is_empty() {
            return nothing_to_do("install");
        }
        exec.run(
            &self
                .apt_get()
                .args(["install", "--no-install-recommends"])
                .args(names.iter().cloned()),
        )
    }

    fn remove(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        if names.is_empty() {
            return nothing_to_do("remove");
        }
        exec.run(&self.apt_get().arg("remove").args(names.iter().cloned()))
    }

    fn purge(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        if names.is_empty() {
            return nothing_to_do("purge");
        }
        exec.run(&self.apt_get().arg("purge").args(names.iter().cloned()))
    }

    fn reinstall(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        if names.is_empty() {
            return nothing_to_do("reinstall");
        }
        exec.run(
            &self
                .apt_get()
                .args(["install", "--reinstall"])
                .args(names.iter().cloned()),
        )
    }

    fn autoremove(&self, exec: &Executor) -> ActionOutcome {
        exec.run(&self.apt_get().args(["autoremove", "--purge"]))
    }

    fn clean(&self, exec: &Executor, paths: &HostPaths) -> Vec<ActionOutcome> {
        let mut outcomes = vec![exec.run(&self.apt_get().arg("clean"))];

        for cache in ["/var/cache/apt/pkgcache.bin", "/var/cache/apt/srcpkgcache.bin"] {
            outcomes.push(exec.remove_path(&paths.resolve(cache)));
        }
        outcomes.push(exec.clear_dir(&paths.resolve("/var/cache/apt/archives/partial")));

        // Package lists are rebuilt by the next `apt-get update`.
        match paths.list_dir("/var/lib/apt/lists") {
            Ok(entries) => {
                for entry in entries {
                    let name = entry.file_name().unwrap_or_default().to_string_lossy();
                    if name == "lock" || name == "partial" {
                        continue;
                    }
                    outcomes.push(exec.remove_path(&entry));
                }
            }
            Err(e) => tracing::warn!("Failed to list apt lists: {}", e),
        }

        outcomes
    }

    fn update(&self, exec: &Executor) -> ActionOutcome {
        exec.run(&self.apt_get().arg("update"))
    }

    fn upgrade(&self, exec: &Executor) -> ActionOutcome {
        exec.run(&self.apt_get().args([
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confold",
            "dist-upgrade",
        ]))
    }

    fn installed_subset(&self, exec: &Executor, candidates: &[String]) -> PackageSet {
        let installed: Vec<String> = self
            .status_rows(exec, candidates)
            .into_iter()
            .filter(|(status, _)| is_installed_status(status))
            .map(|(_, name)| name)
            .collect();

        candidates
            .iter()
            .filter(|c| installed.contains(c))
            .cloned()
            .collect()
    }

    fn list_installed(&self, exec: &Executor, pattern: &str) -> Vec<String> {
        let set: PackageSet = self
            .status_rows(exec, &[pattern.to_string()])
            .into_iter()
            .filter(|(status, _)| is_installed_status(status))
            .map(|(_, name)| name)
            .collect();
        set.as_slice().to_vec()
    }

    fn kernel_packages(&self, exec: &Executor) -> Vec<KernelPackage> {
        let patterns: Vec<String> = KERNEL_PATTERNS.iter().map(|p| p.to_string()).collect();
        let names: PackageSet = self
            .status_rows(exec, &patterns)
            .into_iter()
            .filter(|(status, _)| is_installed_status(status))
            .map(|(_, name)| name)
            .collect();

        names
            .iter()
            .filter_map(|name| {
                // Metapackages such as linux-image-generic carry no version.
                let version = kernel_abi(name)?;
                Some(KernelPackage {
                    name: name.clone(),
                    version,
                })
            })
            .collect()
    }

    fn kernel_version(&self, release: &str) -> Option<String> {
        kernel_abi(release)
    }

    fn owns_path(&self, exec: &Executor, host_path: &Path) -> bool {
        let command = CommandSpec::new("dpkg")
            .arg("-S")
            .arg(host_path.to_string_lossy().into_owned());
        exec.query_stdout(&command).is_some()
    }

    fn residual_config_packages(&self, exec: &Executor) -> Vec<String> {
        let command = CommandSpec::new("dpkg-query").arg("-W").arg(STATUS_FORMAT);
        match exec.query(&command) {
            Ok(output) => parse_status_rows(&output.stdout)
                .into_iter()
                .filter(|(status, _)| status == "rc")
                .map(|(_, name)| name)
                .collect(),
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        }
    }

    fn regenerate_bootloader(&self, exec: &Executor, _paths: &HostPaths) -> ActionOutcome {
        if !exec.has_program("update-grub") {
            return ActionOutcome::skipped("update-grub", "update-grub not available");
        }
        exec.run(&CommandSpec::new("update-grub"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Console;
    use crate::exec::testing::RecordingRunner;
    use crate::exec::CommandOutput;
    use std::sync::Arc;

    fn executor(runner: RecordingRunner, dry_run: bool) -> (Arc<RecordingRunner>, Executor) {
        let runner = Arc::new(runner);
        let exec = Executor::new(runner.clone(), dry_run, Console::plain());
        (runner, exec)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_status_rows() {
        let rows = parse_status_rows("ii  gcc\nrc  old-tool\nun  ghost\n\n");
        assert_eq!(rows.len(), 3);
        assert!(is_installed_status(&rows[0].0));
        assert!(!is_installed_status(&rows[1].0));
        assert!(!is_installed_status(&rows[2].0));
        assert!(is_installed_status("hi"));
    }

    #[test]
    fn test_installed_subset_preserves_candidate_order() {
        let runner = RecordingRunner::new().respond(
            "dpkg-query -W",
            CommandOutput {
                status: Some(1),
                stdout: "ii  make\nii  gcc\n".into(),
                stderr: "dpkg-query: no packages found matching cmake\n".into(),
            },
        );
        let (_runner, exec) = executor(runner, false);

        let set = AptBackend::new().installed_subset(&exec, &names(&["gcc", "cmake", "make"]));
        assert_eq!(set.as_slice(), &["gcc", "make"]);
    }

    #[test]
    fn test_remove_and_purge_commands() {
        let (runner, exec) = executor(RecordingRunner::new(), false);
        let backend = AptBackend::new();

        backend.remove(&exec, &names(&["gdb"]));
        backend.purge(&exec, &names(&["gcc", "make"]));

        assert_eq!(
            runner.calls(),
            vec!["apt-get -y remove gdb", "apt-get -y purge gcc make"]
        );
    }

    #[test]
    fn test_empty_removal_runs_nothing() {
        let (runner, exec) = executor(RecordingRunner::new(), false);
        let outcome = AptBackend::new().purge(&exec, &[]);

        assert!(matches!(outcome, ActionOutcome::Skipped { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_dry_run_removal_is_reported_only() {
        let (runner, exec) = executor(RecordingRunner::new(), true);
        AptBackend::new().purge(&exec, &names(&["gcc"]));

        assert!(runner.calls().is_empty());
        assert_eq!(exec.stats().planned, 1);
    }

    #[test]
    fn test_kernel_packages_skip_metapackages() {
        let runner = RecordingRunner::new().respond(
            "'linux-image-*'",
            CommandOutput::ok(
                "ii  linux-image-5.15.0-10-generic\n\
                 ii  linux-image-5.15.0-20-generic\n\
                 ii  linux-image-generic\n\
                 ii  linux-headers-5.15.0-10\n\
                 ii  linux-headers-5.15.0-10-generic\n\
                 rc  linux-image-5.15.0-5-generic\n",
            ),
        );
        let (_runner, exec) = executor(runner, false);

        let kernels = AptBackend::new().kernel_packages(&exec);
        let versions: Vec<&str> = kernels.iter().map(|k| k.version.as_str()).collect();

        assert_eq!(kernels.len(), 4);
        assert_eq!(versions, vec!["5.15.0-10", "5.15.0-20", "5.15.0-10", "5.15.0-10"]);
    }

    #[test]
    fn test_kernel_version_of_release() {
        let backend = AptBackend::new();
        assert_eq!(
            backend.kernel_version("5.15.0-20-generic").as_deref(),
            Some("5.15.0-20")
        );
        assert_eq!(backend.kernel_version("6.8.0-1012-azure").as_deref(), Some("6.8.0-1012"));
        assert_eq!(backend.kernel_version("garbage"), None);
    }

    #[test]
    fn test_residual_config_packages() {
        let runner = RecordingRunner::new().respond(
            "dpkg-query -W",
            CommandOutput::ok("ii  bash\nrc  linux-image-5.15.0-5-generic\nrc  snapd\n"),
        );
        let (_runner, exec) = executor(runner, false);

        assert_eq!(
            AptBackend::new().residual_config_packages(&exec),
            names(&["linux-image-5.15.0-5-generic", "snapd"])
        );
    }

    #[test]
    fn test_owns_path_uses_dpkg_search() {
        let runner = RecordingRunner::new()
            .respond("/lib/modules/orphan", CommandOutput::failed(1, "no path found"));
        let (_runner, exec) = executor(runner, false);
        let backend = AptBackend::new();

        assert!(backend.owns_path(&exec, Path::new("/lib/modules/5.15.0-20-generic")));
        assert!(!backend.owns_path(&exec, Path::new("/lib/modules/orphan")));
    }

    #[test]
    fn test_clean_keeps_lists_lock() {
        let tmp = tempfile::TempDir::new().unwrap();
        let lists = tmp.path().join("var/lib/apt/lists");
        std::fs::create_dir_all(lists.join("partial")).unwrap();
        std::fs::write(lists.join("lock"), "").unwrap();
        std::fs::write(lists.join("archive.ubuntu.com_dists_jammy_InRelease"), "x").unwrap();

        let (runner, exec) = executor(RecordingRunner::new(), false);
        AptBackend::new().clean(&exec, &HostPaths::new(tmp.path()));

        assert!(runner.called("apt-get -y clean"));
        assert!(lists.join("lock").exists());
        assert!(lists.join("partial").exists());
        assert!(!lists.join("archive.ubuntu.com_dists_jammy_InRelease").exists());
    }
}
