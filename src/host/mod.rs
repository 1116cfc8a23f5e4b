//! Host identification.
//!
//! This module provides:
//! - The immutable [`HostProfile`] built once at startup
//! - Distro detection from os-release and legacy release files
//! - [`HostPaths`], which resolves host paths under a configurable root

mod detect;
mod paths;

pub use detect::{detect, parse_legacy_release, parse_os_release, OsRelease};
pub use paths::HostPaths;

use serde::Serialize;
use std::fmt;

/// Package ecosystem family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistroFamily {
    DebianLike,
    RpmLike,
}

/// Concrete package manager bound for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Yum,
}

impl PackageManagerKind {
    pub fn family(self) -> DistroFamily {
        match self {
            PackageManagerKind::Apt => DistroFamily::DebianLike,
            PackageManagerKind::Dnf | PackageManagerKind::Yum => DistroFamily::RpmLike,
        }
    }

    /// Name of the front-end binary
    pub fn binary(self) -> &'static str {
        match self {
            PackageManagerKind::Apt => "apt-get",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Yum => "yum",
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// What the host is, as far as the cleanup stages care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProfile {
    pub family: DistroFamily,
    /// Lower-cased distro id (e.g. "ubuntu", "rocky")
    pub distro_id: String,
    pub distro_version: String,
    pub package_manager: PackageManagerKind,
    /// Release of the running kernel, as `uname -r` prints it
    pub kernel_release: String,
}

impl HostProfile {
    pub fn is_debian_like(&self) -> bool {
        self.family == DistroFamily::DebianLike
    }

    pub fn is_rpm_like(&self) -> bool {
        self.family == DistroFamily::RpmLike
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}, kernel {})",
            self.distro_id, self.distro_version, self.package_manager, self.kernel_release
        )
    }
}

/// Release of the running kernel.
pub fn running_kernel_release() -> crate::error::Result<String> {
    let uts = nix::sys::utsname::uname()?;
    Ok(uts.release().to_string_lossy().into_owned())
}
