//! Snap removal.
//!
//! snapd runs changes asynchronously, and removing a snap while a change is
//! in flight either fails or leaves the snap half-removed. The removal is
//! therefore a fixed sequence of states: hold refreshes, abort what is
//! running, wait (bounded) for quiescence, then tear down apps, bases,
//! mounts and finally snapd itself. Every step is best-effort.

use chrono::{SecondsFormat, TimeDelta, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp::Reverse;
use std::fs;
use std::time::{Duration, Instant};

use super::{plural, Stage, StageContext};
use crate::config::SnapConfig;
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};

/// Source of time for the quiescence wait.
pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by [`Instant`] and `thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Steps of the removal, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapState {
    Idle,
    RefreshHeld,
    ConflictsAborted,
    Quiesced,
    ServicesStopped,
    RemovingApps,
    RemovingBases,
    Unmounting,
    RemovingLeftovers,
    ServicesDisabled,
    PackagePurged,
    Done,
}

/// How long to wait for in-flight changes and how often to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescePolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl QuiescePolicy {
    pub fn from_config(config: &SnapConfig, dry_run: bool) -> Self {
        // Nothing gets aborted in a dry run, so one look is enough.
        if dry_run {
            return Self::single_check();
        }
        Self {
            timeout: config.quiesce_timeout(),
            interval: config.poll_interval(),
        }
    }

    pub fn single_check() -> Self {
        Self {
            timeout: Duration::ZERO,
            interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuiesceStatus {
    Cleared,
    TimedOut { in_flight: usize },
}

/// A row of `snap changes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapChange {
    pub id: String,
    pub status: String,
}

impl SnapChange {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status.as_str(),
            "Do" | "Doing" | "Undo" | "Undoing" | "Wait"
        )
    }
}

pub fn parse_changes(stdout: &str) -> Vec<SnapChange> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let status = parts.next()?;
            if !id.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some(SnapChange {
                id: id.to_string(),
                status: status.to_string(),
            })
        })
        .collect()
}

/// Snap names from `snap list`, header dropped.
pub fn parse_snap_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| {
            *name != "Name"
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
        .map(str::to_string)
        .collect()
}

fn core_generation(name: &str) -> Option<u32> {
    name.strip_prefix("core")
        .filter(|n| !n.is_empty())
        .and_then(|n| n.parse().ok())
}

/// Reserved base snaps: `core`, `core<N>`, `bare` and `snapd`.
pub fn is_base(name: &str) -> bool {
    matches!(name, "core" | "bare" | "snapd") || core_generation(name).is_some()
}

/// Order bases for removal: newest `core<N>` first, then `core`, `bare`,
/// and `snapd` last.
pub fn order_bases(bases: &mut [String]) {
    bases.sort_by_key(|name| match (name.as_str(), core_generation(name)) {
        (_, Some(n)) => (0, Reverse(n)),
        ("core", _) => (1, Reverse(0)),
        ("bare", _) => (2, Reverse(0)),
        _ => (3, Reverse(0)),
    });
}

/// Snaps that run containers and must go before anything they host.
const CONTAINER_SNAPS: &[&str] = &["lxd", "docker"];

const SNAPD_TIMERS: &[&str] = &["snapd.refresh.timer", "snapd.snap-repair.timer"];
const SNAPD_UNITS: &[&str] = &["snapd.service", "snapd.socket", "snapd.seeded.service"];
const SNAPD_DIRS: &[&str] = &["/snap", "/var/snap", "/var/lib/snapd", "/var/cache/snapd"];
const SNAPD_PIN: &str = "/etc/apt/preferences.d/no-snapd.pref";

pub fn snapd_pin() -> String {
    "Package: snapd\nPin: release a=*\nPin-Priority: -10\n".to_string()
}

fn in_flight_changes(exec: &Executor) -> Vec<SnapChange> {
    exec.query_stdout(&CommandSpec::new("snap").arg("changes"))
        .map(|out| parse_changes(&out))
        .unwrap_or_default()
        .into_iter()
        .filter(SnapChange::is_in_flight)
        .collect()
}

/// Poll `snap changes` until nothing is in flight or the deadline passes.
///
/// Never sleeps past the deadline, whatever snapd reports.
pub fn wait_for_quiescence(
    exec: &Executor,
    clock: &dyn Clock,
    policy: QuiescePolicy,
) -> QuiesceStatus {
    let deadline = clock.now() + policy.timeout;
    loop {
        let in_flight = in_flight_changes(exec).len();
        if in_flight == 0 {
            return QuiesceStatus::Cleared;
        }

        let now = clock.now();
        let step = policy.interval.min(deadline.saturating_sub(now));
        if now >= deadline || step.is_zero() {
            return QuiesceStatus::TimedOut { in_flight };
        }
        tracing::debug!(in_flight, "Waiting {:?} for snap changes to settle", step);
        clock.sleep(step);
    }
}

/// Unmount targets under `/snap` or `/var/snap` from a mounts table,
/// deepest first.
pub fn snap_mount_points(mounts: &str) -> Vec<String> {
    let under = |mp: &str, dir: &str| mp == dir || mp.starts_with(&format!("{}/", dir));

    let mut points: Vec<String> = mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|mp| mp.replace("\\040", " "))
        .filter(|mp| under(mp, "/snap") || under(mp, "/var/snap"))
        .collect();
    points.sort_by(|a, b| {
        let depth = |p: &str| p.matches('/').count();
        depth(b).cmp(&depth(a)).then_with(|| b.cmp(a))
    });
    points.dedup();
    points
}

/// Drives one pass through [`SnapState`], recording every state entered.
pub struct SnapRemoval<'c, 'a> {
    ctx: &'c StageContext<'a>,
    policy: QuiescePolicy,
    trace: Vec<SnapState>,
    /// Snaps already handed to `snap remove` in this pass
    handled: Vec<String>,
}

impl<'c, 'a> SnapRemoval<'c, 'a> {
    pub fn new(ctx: &'c StageContext<'a>) -> Self {
        Self {
            ctx,
            policy: QuiescePolicy::from_config(&ctx.config.snap, ctx.exec.is_dry_run()),
            trace: Vec::new(),
            handled: Vec::new(),
        }
    }

    /// Run to [`SnapState::Done`] and return the states entered.
    pub fn run(mut self) -> Vec<SnapState> {
        self.enter(SnapState::Idle);
        let ctx = self.ctx;
        let console = ctx.console();

        if !ctx.profile.is_debian_like() {
            console.info("Snap is only removed on Debian-family hosts");
            self.enter(SnapState::Done);
            return self.trace;
        }
        if !ctx.exec.has_program("snap") {
            console.info("snap is not installed");
            self.enter(SnapState::Done);
            return self.trace;
        }

        self.hold_refreshes();
        self.enter(SnapState::RefreshHeld);

        self.abort_in_flight();
        self.enter(SnapState::ConflictsAborted);

        self.quiesce();
        self.enter(SnapState::Quiesced);

        ctx.exec
            .run(&CommandSpec::new("systemctl").arg("stop").args(SNAPD_TIMERS.iter().copied()));
        self.enter(SnapState::ServicesStopped);

        let installed = self.list_snaps();
        let (mut bases, apps): (Vec<String>, Vec<String>) =
            installed.into_iter().partition(|name| is_base(name));

        self.enter(SnapState::RemovingApps);
        self.remove_apps(&apps);

        self.enter(SnapState::RemovingBases);
        order_bases(&mut bases);
        for base in &bases {
            self.remove_snap(base);
        }

        self.enter(SnapState::Unmounting);
        self.unmount();

        self.enter(SnapState::RemovingLeftovers);
        self.remove_leftovers();

        self.enter(SnapState::ServicesDisabled);
        self.disable_snapd();

        self.enter(SnapState::PackagePurged);
        self.purge_snapd();

        self.enter(SnapState::Done);
        self.trace
    }

    fn enter(&mut self, state: SnapState) {
        tracing::debug!(?state, "snap removal");
        self.trace.push(state);
    }

    fn hold_refreshes(&self) {
        let until = (Utc::now() + TimeDelta::days(365)).to_rfc3339_opts(SecondsFormat::Secs, true);
        self.ctx.exec.run(
            &CommandSpec::new("snap")
                .args(["set", "system"])
                .arg(format!("refresh.hold={}", until)),
        );
    }

    fn abort_in_flight(&self) {
        for change in in_flight_changes(self.ctx.exec) {
            self.ctx
                .exec
                .run(&CommandSpec::new("snap").args(["abort", change.id.as_str()]));
        }
    }

    fn quiesce(&self) {
        let console = self.ctx.console();
        let spinner = console.is_interactive().then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                pb.set_style(style);
            }
            pb.set_message("Waiting for snap changes to settle");
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        });

        let status = wait_for_quiescence(self.ctx.exec, self.ctx.clock, self.policy);

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        match status {
            QuiesceStatus::Cleared => {}
            QuiesceStatus::TimedOut { in_flight } if self.ctx.exec.is_dry_run() => {
                console.info(&format!("{} snap change{} in flight", in_flight, plural(in_flight)));
            }
            QuiesceStatus::TimedOut { in_flight } => console.warn(&format!(
                "{} snap change{} still in flight after {}s; continuing",
                in_flight,
                plural(in_flight),
                self.policy.timeout.as_secs()
            )),
        }
    }

    fn list_snaps(&self) -> Vec<String> {
        self.ctx
            .exec
            .query_stdout(&CommandSpec::new("snap").arg("list"))
            .map(|out| parse_snap_list(&out))
            .unwrap_or_default()
    }

    fn remove_snap(&mut self, name: &str) {
        self.abort_in_flight();
        self.quiesce();
        self.ctx
            .exec
            .run(&CommandSpec::new("snap").args(["remove", "--purge", name]));
        self.handled.push(name.to_string());
    }

    fn remove_apps(&mut self, apps: &[String]) {
        let (containers, others): (Vec<&String>, Vec<&String>) = apps
            .iter()
            .partition(|name| CONTAINER_SNAPS.contains(&name.as_str()));

        for name in containers {
            self.stop_containers(name);
            self.remove_snap(name);
        }
        for name in others {
            self.remove_snap(name);
        }
    }

    fn stop_containers(&self, snap: &str) {
        let exec = self.ctx.exec;
        match snap {
            "lxd" => {
                if exec.has_program("lxc") {
                    exec.run(&CommandSpec::new("lxc").args(["stop", "--all"]));
                }
                exec.run(&CommandSpec::new("systemctl").args(["stop", "snap.lxd.daemon"]));
            }
            "docker" => {
                let ids: Vec<String> = exec
                    .query_stdout(&CommandSpec::new("docker").args(["ps", "-q"]))
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                if !ids.is_empty() {
                    exec.run(&CommandSpec::new("docker").arg("stop").args(ids));
                }
                exec.run(&CommandSpec::new("systemctl").args(["stop", "snap.docker.dockerd"]));
            }
            _ => {}
        }
    }

    fn unmount(&self) {
        let mounts = self.ctx.paths.resolve("/proc/mounts");
        let table = match fs::read_to_string(&mounts) {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", mounts.display(), e);
                return;
            }
        };
        for point in snap_mount_points(&table) {
            self.ctx
                .exec
                .run(&CommandSpec::new("umount").arg("-lf").arg(point));
        }
    }

    fn remove_leftovers(&mut self) {
        // A dry run removed nothing, so everything handled is still listed.
        let dry_run = self.ctx.exec.is_dry_run();
        let (mut bases, apps): (Vec<String>, Vec<String>) = self
            .list_snaps()
            .into_iter()
            .filter(|name| !(dry_run && self.handled.contains(name)))
            .partition(|name| is_base(name));
        order_bases(&mut bases);

        for name in apps.iter().chain(&bases) {
            self.remove_snap(name);
        }
    }

    fn disable_snapd(&self) {
        let exec = self.ctx.exec;
        exec.run(
            &CommandSpec::new("systemctl")
                .args(["disable", "--now"])
                .args(SNAPD_UNITS.iter().copied()),
        );
        exec.run(&CommandSpec::new("systemctl").arg("mask").args(SNAPD_UNITS.iter().copied()));
    }

    fn purge_snapd(&self) {
        let ctx = self.ctx;
        ctx.backend.purge(ctx.exec, &["snapd".to_string()]);

        for dir in SNAPD_DIRS {
            ctx.exec.remove_path(&ctx.paths.resolve(dir));
        }
        for home in ctx.paths.home_dirs() {
            ctx.exec.remove_path(&home.join("snap"));
        }

        if ctx.config.snap.pin_out {
            let pin = ctx.paths.resolve(SNAPD_PIN);
            let wanted = snapd_pin();
            if fs::read_to_string(&pin).ok().as_deref() != Some(wanted.as_str()) {
                ctx.exec.write_file(&pin, &wanted);
            }
        }
    }
}

pub struct SnapStage;

impl Stage for SnapStage {
    fn id(&self) -> &'static str {
        "snap"
    }

    fn title(&self) -> &'static str {
        "Snap removal"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let trace = SnapRemoval::new(ctx).run();
        tracing::debug!(states = trace.len(), "snap removal finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use crate::exec::CommandOutput;
    use crate::host::PackageManagerKind;
    use crate::stages::testing::{FakeClock, Fixture};
    use std::sync::Arc;

    const BUSY: &str = "\
ID   Status  Spawn               Ready               Summary
41   Done    today at 10:01 UTC  today at 10:02 UTC  Auto-refresh snap \"lxd\"
42   Doing   today at 10:05 UTC  -                   Auto-refresh snap \"core22\"
";

    const SNAP_LIST: &str = "\
Name    Version   Rev    Tracking       Publisher   Notes
core22  20240111  1122   latest/stable  canonical   base
hello   2.10      42     latest/stable  canonical   -
lxd     5.0.3     27948  5.0/stable     canonical   -
core20  20240227  2264   latest/stable  canonical   base
snapd   2.61      20671  latest/stable  canonical   snapd
";

    fn executor(runner: RecordingRunner) -> (Arc<RecordingRunner>, Executor) {
        let runner = Arc::new(runner);
        let exec = Executor::new(runner.clone(), false, crate::console::Console::plain());
        (runner, exec)
    }

    #[test]
    fn test_parse_changes() {
        let changes = parse_changes(BUSY);
        assert_eq!(changes.len(), 2);
        assert!(!changes[0].is_in_flight());
        assert!(changes[1].is_in_flight());
        assert_eq!(changes[1].id, "42");
    }

    #[test]
    fn test_parse_snap_list() {
        assert_eq!(
            parse_snap_list(SNAP_LIST),
            vec!["core22", "hello", "lxd", "core20", "snapd"]
        );
        assert!(parse_snap_list("No snaps are installed yet.\n").is_empty());
    }

    #[test]
    fn test_base_ordering() {
        let mut bases: Vec<String> = ["snapd", "core", "core18", "bare", "core22", "core20", "core24"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        order_bases(&mut bases);
        assert_eq!(
            bases,
            vec!["core24", "core22", "core20", "core18", "core", "bare", "snapd"]
        );
        assert!(is_base("core"));
        assert!(!is_base("corezilla"));
        assert!(!is_base("hello"));
    }

    #[test]
    fn test_quiescence_is_bounded() {
        let (_runner, exec) = executor(RecordingRunner::new().respond("snap changes", CommandOutput::ok(BUSY)));
        let clock = FakeClock::default();
        let policy = QuiescePolicy {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(5),
        };

        let status = wait_for_quiescence(&exec, &clock, policy);

        assert_eq!(status, QuiesceStatus::TimedOut { in_flight: 1 });
        assert!(clock.now() <= Duration::from_secs(60));
        assert_eq!(clock.sleeps(), 12);
    }

    #[test]
    fn test_quiescence_never_oversleeps_an_odd_bound() {
        let (_runner, exec) = executor(RecordingRunner::new().respond("snap changes", CommandOutput::ok(BUSY)));
        let clock = FakeClock::default();
        let policy = QuiescePolicy {
            timeout: Duration::from_secs(7),
            interval: Duration::from_secs(5),
        };

        wait_for_quiescence(&exec, &clock, policy);
        assert_eq!(clock.now(), Duration::from_secs(7));
    }

    #[test]
    fn test_quiescence_clears() {
        let (runner, exec) = executor(RecordingRunner::new().respond_seq(
            "snap changes",
            vec![CommandOutput::ok(BUSY), CommandOutput::ok(BUSY), CommandOutput::ok("")],
        ));
        let clock = FakeClock::default();
        let policy = QuiescePolicy {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(5),
        };

        assert_eq!(wait_for_quiescence(&exec, &clock, policy), QuiesceStatus::Cleared);
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(runner.count("snap changes"), 3);
    }

    #[test]
    fn test_single_check_policy_never_sleeps() {
        let (_runner, exec) = executor(RecordingRunner::new().respond("snap changes", CommandOutput::ok(BUSY)));
        let clock = FakeClock::default();

        let status = wait_for_quiescence(&exec, &clock, QuiescePolicy::single_check());
        assert!(matches!(status, QuiesceStatus::TimedOut { .. }));
        assert_eq!(clock.sleeps(), 0);
    }

    #[test]
    fn test_snap_mount_points_deepest_first() {
        let mounts = "\
/dev/sda1 / ext4 rw 0 0
/dev/loop0 /snap/core22/1122 squashfs ro 0 0
/dev/loop1 /snap/lxd/27948 squashfs ro 0 0
tmpfs /var/snap/lxd/common/ns tmpfs rw 0 0
nsfs /run/snapd/ns/lxd.mnt nsfs rw 0 0
/dev/sdb1 /snapshots ext4 rw 0 0
";
        assert_eq!(
            snap_mount_points(mounts),
            vec![
                "/var/snap/lxd/common/ns",
                "/snap/lxd/27948",
                "/snap/core22/1122",
            ]
        );
    }

    #[test]
    fn test_full_removal_trace() {
        let runner = RecordingRunner::new()
            .with_program("snap")
            .with_program("lxc")
            .respond("snap list", CommandOutput::ok(SNAP_LIST));
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, false);
        fixture.write(
            "/proc/mounts",
            "/dev/loop0 /snap/core22/1122 squashfs ro 0 0\n/dev/sda1 / ext4 rw 0 0\n",
        );
        fixture.mkdir("/snap/core22/1122");
        fixture.mkdir("/var/lib/snapd/snaps");
        fixture.mkdir("/home/alice/snap/hello");

        let ctx = fixture.ctx();
        let trace = SnapRemoval::new(&ctx).run();

        assert_eq!(
            trace,
            vec![
                SnapState::Idle,
                SnapState::RefreshHeld,
                SnapState::ConflictsAborted,
                SnapState::Quiesced,
                SnapState::ServicesStopped,
                SnapState::RemovingApps,
                SnapState::RemovingBases,
                SnapState::Unmounting,
                SnapState::RemovingLeftovers,
                SnapState::ServicesDisabled,
                SnapState::PackagePurged,
                SnapState::Done,
            ]
        );

        let runner = &fixture.runner;
        let pos = |prefix: &str| runner.position(prefix).unwrap();
        assert!(pos("snap set system refresh.hold=") < pos("systemctl stop snapd.refresh.timer"));
        assert!(pos("lxc stop --all") < pos("snap remove --purge lxd"));
        assert!(pos("snap remove --purge lxd") < pos("snap remove --purge hello"));
        assert!(pos("snap remove --purge hello") < pos("snap remove --purge core22"));
        assert!(pos("snap remove --purge core22") < pos("snap remove --purge core20"));
        assert!(pos("snap remove --purge core20") < pos("snap remove --purge snapd"));
        assert!(pos("snap remove --purge snapd") < pos("umount -lf /snap/core22/1122"));
        assert!(pos("systemctl mask snapd.service") < pos("apt-get -y purge snapd"));

        assert!(!fixture.exists("/snap"));
        assert!(!fixture.exists("/var/lib/snapd"));
        assert!(!fixture.exists("/home/alice/snap"));
        assert_eq!(fixture.read(SNAPD_PIN), snapd_pin());
    }

    #[test]
    fn test_non_debian_goes_straight_to_done() {
        let fixture = Fixture::new(
            PackageManagerKind::Dnf,
            RecordingRunner::new().with_program("snap"),
            false,
        );
        let ctx = fixture.ctx();

        assert_eq!(SnapRemoval::new(&ctx).run(), vec![SnapState::Idle, SnapState::Done]);
        assert!(fixture.runner.calls().is_empty());
    }

    #[test]
    fn test_missing_snap_is_a_noop() {
        let fixture = Fixture::new(PackageManagerKind::Apt, RecordingRunner::new(), false);
        SnapStage.run(&fixture.ctx()).unwrap();
        assert!(fixture.runner.calls().is_empty());
    }

    #[test]
    fn test_dry_run_only_queries() {
        let runner = RecordingRunner::new()
            .with_program("snap")
            .respond("snap list", CommandOutput::ok(SNAP_LIST))
            .respond("snap changes", CommandOutput::ok(BUSY));
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, true);
        fixture.mkdir("/var/lib/snapd/snaps");

        SnapStage.run(&fixture.ctx()).unwrap();

        assert!(fixture
            .runner
            .calls()
            .iter()
            .all(|c| c == "snap changes" || c == "snap list"));
        assert_eq!(fixture.clock.sleeps(), 0);
        assert!(fixture.exists("/var/lib/snapd/snaps"));
        assert!(!fixture.exists(SNAPD_PIN));
        assert!(fixture.exec.stats().planned > 0);
    }
}
