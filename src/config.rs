use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// System-wide configuration file location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vm-sweeper/config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub locale: LocaleConfig,
    pub logs: LogConfig,
    pub caches: CacheConfig,
    pub devtools: DevToolsConfig,
    pub snap: SnapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    /// Locale codes to keep (e.g. "en", "en_US", "C")
    pub keep: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Plain-text logs above this size are cut down to their last bytes
    pub max_file_bytes: u64,
    /// Compressed rotated logs older than this are deleted
    pub compressed_max_age_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Files under ~/.cache older than this are deleted
    pub max_age_days: u64,
    /// Extra cache paths, relative to each home directory
    pub extra_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevToolsConfig {
    /// Packages removed in addition to the built-in list
    pub extra_packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Upper bound for waiting on in-flight snap changes
    pub quiesce_timeout_secs: u64,
    /// Delay between two `snap changes` polls
    pub poll_interval_secs: u64,
    /// Write an apt pin that keeps snapd from coming back
    pub pin_out: bool,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            keep: vec!["en".to_string(), "en_US".to_string(), "C".to_string()],
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024, // 1 MiB
            compressed_max_age_days: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            extra_paths: vec![],
        }
    }
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            quiesce_timeout_secs: 60,
            poll_interval_secs: 5,
            pin_out: true,
        }
    }
}

impl SnapConfig {
    pub fn quiesce_timeout(&self) -> Duration {
        Duration::from_secs(self.quiesce_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the system-wide file and then
    /// the per-user file are tried, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_locations().into_iter().find(|p| p.is_file()) {
                Some(found) => {
                    tracing::debug!(path = %found.display(), "Using configuration file");
                    Self::from_file(&found)?
                }
                None => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config = toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(config)
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("vm-sweeper").join("config.toml"));
        }
        locations
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.locale.keep.is_empty() {
            return Err(ConfigError::Invalid(
                "locale.keep must name at least one locale".into(),
            ));
        }
        if let Some(bad) = self
            .locale
            .keep
            .iter()
            .find(|code| code.is_empty() || code.contains('/'))
        {
            return Err(ConfigError::Invalid(format!(
                "locale.keep contains an invalid code: '{}'",
                bad
            )));
        }
        if self.logs.max_file_bytes == 0 {
            return Err(ConfigError::Invalid(
                "logs.max_file_bytes must be greater than 0".into(),
            ));
        }
        if self.snap.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "snap.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.snap.poll_interval_secs > self.snap.quiesce_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "snap.poll_interval_secs ({}) exceeds snap.quiesce_timeout_secs ({})",
                self.snap.poll_interval_secs, self.snap.quiesce_timeout_secs
            )));
        }
        if let Some(bad) = self
            .caches
            .extra_paths
            .iter()
            .find(|p| Path::new(p).is_absolute() || p.split('/').any(|c| c == ".."))
        {
            return Err(ConfigError::Invalid(format!(
                "caches.extra_paths entries must be relative to the home directory: '{}'",
                bad
            )));
        }
        Ok(())
    }
}

/// Per-run switches taken from the command line. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub dry_run: bool,
    pub remove_cloud_init: bool,
    pub do_system_update: bool,
    pub keep_one_backup_kernel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            remove_cloud_init: true,
            do_system_update: true,
            keep_one_backup_kernel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.snap.quiesce_timeout_secs, 60);
        assert_eq!(config.snap.poll_interval_secs, 5);
        assert_eq!(config.logs.max_file_bytes, 1024 * 1024);
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[locale]"));
        assert!(toml_str.contains("[snap]"));
    }

    #[test]
    fn default_locale_keeps_english() {
        let config = LocaleConfig::default();
        assert!(config.keep.contains(&"en_US".to_string()));
        assert!(config.keep.contains(&"C".to_string()));
    }

    #[test]
    fn empty_locale_list_is_rejected() {
        let mut config = Config::default();
        config.locale.keep.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[paths]\nroot = \"/mnt/image\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn escaping_cache_path_is_rejected() {
        let mut config = Config::default();
        config.caches.extra_paths.push("../etc".into());
        assert!(config.validate().is_err());

        config.caches.extra_paths = vec!["/var/cache".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn run_config_defaults_match_flagless_invocation() {
        let run = RunConfig::default();
        assert!(!run.dry_run);
        assert!(run.remove_cloud_init);
        assert!(run.do_system_update);
        assert!(!run.keep_one_backup_kernel);
    }
}
