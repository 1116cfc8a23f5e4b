//! Fake host for stage tests: a temp root, a scripted runner and a fake clock.

use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::{Clock, StageContext};
use crate::config::{Config, RunConfig};
use crate::console::Console;
use crate::exec::testing::RecordingRunner;
use crate::exec::Executor;
use crate::host::{HostPaths, HostProfile, PackageManagerKind};
use crate::pkg::{backend_for, PackageBackend};

/// Clock that advances only when slept on.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Cell<Duration>,
    sleeps: Cell<usize>,
}

impl FakeClock {
    pub fn sleeps(&self) -> usize {
        self.sleeps.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

pub struct Fixture {
    pub root: TempDir,
    pub runner: Arc<RecordingRunner>,
    pub exec: Executor,
    pub profile: HostProfile,
    pub config: Config,
    pub run: RunConfig,
    pub paths: HostPaths,
    pub backend: Box<dyn PackageBackend>,
    pub clock: FakeClock,
}

impl Fixture {
    pub fn new(kind: PackageManagerKind, runner: RecordingRunner, dry_run: bool) -> Self {
        let root = TempDir::new().expect("create temp root");
        let runner = Arc::new(runner);
        let exec = Executor::new(runner.clone(), dry_run, Console::plain());

        let profile = match kind {
            PackageManagerKind::Apt => HostProfile {
                family: kind.family(),
                distro_id: "ubuntu".into(),
                distro_version: "22.04".into(),
                package_manager: kind,
                kernel_release: "5.15.0-20-generic".into(),
            },
            _ => HostProfile {
                family: kind.family(),
                distro_id: "rocky".into(),
                distro_version: "9.4".into(),
                package_manager: kind,
                kernel_release: "5.14.0-427.13.1.el9_4.x86_64".into(),
            },
        };
        let backend = backend_for(&profile);
        let paths = HostPaths::new(root.path());

        Self {
            root,
            runner,
            exec,
            profile,
            config: Config::default(),
            run: RunConfig {
                dry_run,
                ..RunConfig::default()
            },
            paths,
            backend,
            clock: FakeClock::default(),
        }
    }

    pub fn ctx(&self) -> StageContext<'_> {
        StageContext {
            profile: &self.profile,
            run: &self.run,
            config: &self.config,
            paths: &self.paths,
            backend: self.backend.as_ref(),
            exec: &self.exec,
            clock: &self.clock,
        }
    }

    /// Location of a host path inside the fake root.
    pub fn path(&self, host_path: &str) -> PathBuf {
        self.paths.resolve(host_path)
    }

    pub fn write(&self, host_path: &str, contents: &str) -> PathBuf {
        let path = self.path(host_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn mkdir(&self, host_path: &str) -> PathBuf {
        let path = self.path(host_path);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn read(&self, host_path: &str) -> String {
        fs::read_to_string(self.path(host_path)).unwrap()
    }

    pub fn exists(&self, host_path: &str) -> bool {
        self.path(host_path).exists()
    }
}
