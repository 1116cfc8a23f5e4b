//! Package manager abstraction.
//!
//! Every stage is written once against [`PackageBackend`]; only the
//! implementations in this module know apt, dnf or yum syntax.

mod apt;
mod rpm;

pub use apt::AptBackend;
pub use rpm::RpmBackend;

use serde::Serialize;
use std::path::Path;

use crate::exec::{ActionOutcome, Executor};
use crate::host::{DistroFamily, HostPaths, HostProfile, PackageManagerKind};

/// Ordered set of package names. Duplicates are dropped on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSet(Vec<String>);

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name, returning false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl FromIterator<String> for PackageSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = PackageSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

impl<'a> IntoIterator for &'a PackageSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An installed kernel-related package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPackage {
    /// Name to hand to the package manager for removal
    pub name: String,
    /// Kernel version the package belongs to, comparable with
    /// [`PackageBackend::kernel_version`] of the running release
    pub version: String,
}

/// Trait for package manager backends.
///
/// Mutating verbs are best-effort: they return an [`ActionOutcome`] and a
/// failing package manager never aborts a stage. Queries always run, even in
/// dry-run mode.
pub trait PackageBackend {
    /// Which package manager this backend drives.
    fn kind(&self) -> PackageManagerKind;

    fn family(&self) -> DistroFamily {
        self.kind().family()
    }

    fn install(&self, exec: &Executor, names: &[String]) -> ActionOutcome;

    fn remove(&self, exec: &Executor, names: &[String]) -> ActionOutcome;

    /// Remove packages together with their configuration files.
    fn purge(&self, exec: &Executor, names: &[String]) -> ActionOutcome {
        self.remove(exec, names)
    }

    fn reinstall(&self, exec: &Executor, names: &[String]) -> ActionOutcome;

    fn autoremove(&self, exec: &Executor) -> ActionOutcome;

    /// Clear the package cache, including its on-disk directories.
    fn clean(&self, exec: &Executor, paths: &HostPaths) -> Vec<ActionOutcome>;

    /// Refresh repository metadata.
    fn update(&self, exec: &Executor) -> ActionOutcome;

    fn upgrade(&self, exec: &Executor) -> ActionOutcome;

    /// Which of `candidates` are currently installed, in candidate order.
    fn installed_subset(&self, exec: &Executor, candidates: &[String]) -> PackageSet;

    fn is_installed(&self, exec: &Executor, name: &str) -> bool {
        self.installed_subset(exec, &[name.to_string()])
            .contains(name)
    }

    /// Installed packages whose name matches a shell glob.
    fn list_installed(&self, exec: &Executor, pattern: &str) -> Vec<String>;

    /// Installed kernel image, module and header packages.
    fn kernel_packages(&self, exec: &Executor) -> Vec<KernelPackage>;

    /// The kernel version a `uname -r` release belongs to, in the form used
    /// by [`KernelPackage::version`].
    fn kernel_version(&self, release: &str) -> Option<String>;

    /// Whether any installed package owns a host path.
    fn owns_path(&self, exec: &Executor, host_path: &Path) -> bool;

    /// Packages removed but with configuration left behind.
    fn residual_config_packages(&self, _exec: &Executor) -> Vec<String> {
        Vec::new()
    }

    /// Remove a package group, if the family has groups and it is installed.
    fn remove_group(&self, _exec: &Executor, _group: &str) -> Option<ActionOutcome> {
        None
    }

    fn regenerate_bootloader(&self, exec: &Executor, paths: &HostPaths) -> ActionOutcome;

    /// Packages nothing depends on and nobody asked for.
    fn unneeded_packages(&self, _exec: &Executor) -> Vec<String> {
        Vec::new()
    }
}

/// Pick the backend for a detected host.
pub fn backend_for(profile: &HostProfile) -> Box<dyn PackageBackend> {
    match profile.package_manager {
        PackageManagerKind::Apt => Box::new(AptBackend::new()),
        kind @ (PackageManagerKind::Dnf | PackageManagerKind::Yum) => {
            Box::new(RpmBackend::new(kind))
        }
    }
}

fn nothing_to_do(verb: &str) -> ActionOutcome {
    ActionOutcome::skipped(verb, "no packages given")
}
