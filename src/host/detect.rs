//! Distro detection.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::{DistroFamily, HostPaths, HostProfile, PackageManagerKind};
use crate::error::{Result, SweeperError};
use crate::exec::CommandRunner;

const OS_RELEASE: &str = "/etc/os-release";
const LEGACY_RELEASE_FILES: &[&str] = &["/etc/redhat-release", "/etc/system-release", "/etc/issue"];

/// Known names in legacy release strings, checked in order.
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("ubuntu", "ubuntu"),
    ("debian", "debian"),
    ("almalinux", "almalinux"),
    ("centos", "centos"),
    ("rocky", "rocky"),
    ("red hat enterprise", "rhel"),
    ("fedora", "fedora"),
];

/// Fields of interest from an os-release file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
}

/// Parse the key=value os-release format.
///
/// Returns `None` when no `ID` is present.
pub fn parse_os_release(contents: &str) -> Option<OsRelease> {
    let fields: HashMap<&str, String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), unquote(value.trim())))
        .collect();

    let id = fields.get("ID")?.to_lowercase();
    if id.is_empty() {
        return None;
    }

    Some(OsRelease {
        id,
        version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
    })
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(\.\d+)*").expect("valid version regex"))
}

/// Recognize a distro from a free-form release string such as
/// `Rocky Linux release 9.3 (Blue Onyx)`.
pub fn parse_legacy_release(contents: &str) -> Option<OsRelease> {
    let lower = contents.to_lowercase();
    let (_, id) = LEGACY_NAMES.iter().find(|(name, _)| lower.contains(name))?;
    let version_id = version_regex()
        .find(contents)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(OsRelease {
        id: id.to_string(),
        version_id,
    })
}

fn package_manager_for(id: &str, runner: &dyn CommandRunner) -> Result<PackageManagerKind> {
    match id {
        "ubuntu" | "debian" => Ok(PackageManagerKind::Apt),
        "almalinux" | "centos" | "rocky" | "rhel" | "fedora" => {
            if runner.exists("dnf") {
                Ok(PackageManagerKind::Dnf)
            } else {
                Ok(PackageManagerKind::Yum)
            }
        }
        other => Err(SweeperError::UnsupportedDistro {
            id: other.to_string(),
        }),
    }
}

fn read_release(paths: &HostPaths) -> Option<OsRelease> {
    if let Ok(contents) = std::fs::read_to_string(paths.resolve(OS_RELEASE)) {
        if let Some(release) = parse_os_release(&contents) {
            return Some(release);
        }
        tracing::debug!("{} has no ID field, trying legacy files", OS_RELEASE);
    }

    LEGACY_RELEASE_FILES.iter().find_map(|file| {
        let contents = std::fs::read_to_string(paths.resolve(file)).ok()?;
        let release = parse_legacy_release(&contents)?;
        tracing::debug!(file, id = %release.id, "Identified distro from legacy file");
        Some(release)
    })
}

/// Build the host profile. Fails for unknown or unsupported distros, before
/// anything has been touched.
pub fn detect(
    paths: &HostPaths,
    runner: &dyn CommandRunner,
    kernel_release: &str,
) -> Result<HostProfile> {
    let release = read_release(paths).ok_or(SweeperError::UnknownDistro)?;
    let package_manager = package_manager_for(&release.id, runner)?;

    let profile = HostProfile {
        family: package_manager.family(),
        distro_id: release.id,
        distro_version: release.version_id,
        package_manager,
        kernel_release: kernel_release.to_string(),
    };
    debug_assert_eq!(
        profile.family == DistroFamily::DebianLike,
        profile.package_manager == PackageManagerKind::Apt
    );

    tracing::info!(%profile, "Detected host");
    Ok(profile)
}
