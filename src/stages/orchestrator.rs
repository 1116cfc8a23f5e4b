//! Sequential stage runner.

use serde::Serialize;

use super::{StageContext, StageRegistry};
use crate::exec::ActionStats;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// The stage returned an error; later stages still ran.
    Failed(String),
    /// The stage did not apply to this host or run.
    Skipped(String),
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub id: &'static str,
    pub title: &'static str,
    pub status: StageStatus,
    /// Actions the stage passed through the executor
    pub actions: ActionStats,
}

/// Summary statistics over all stage reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub actions: ActionStats,
}

/// Run every stage of the registry in order.
///
/// Stage errors are recorded and never stop the pipeline.
pub fn run_stages(registry: &StageRegistry, ctx: &StageContext<'_>) -> Vec<StageReport> {
    let console = ctx.console();
    let mut reports = Vec::with_capacity(registry.len());

    for stage in registry.stages() {
        if !stage.enabled(ctx) {
            console.info(&format!("Skipping {}: {}", stage.title(), stage.skip_reason()));
            tracing::debug!(stage = stage.id(), "Stage skipped");
            reports.push(StageReport {
                id: stage.id(),
                title: stage.title(),
                status: StageStatus::Skipped(stage.skip_reason().to_string()),
                actions: ActionStats::default(),
            });
            continue;
        }

        console.stage(stage.title());
        let span = tracing::info_span!("stage", id = stage.id());
        let _entered = span.enter();
        let before = ctx.exec.stats();

        let status = match stage.run(ctx) {
            Ok(()) => StageStatus::Completed,
            Err(e) => {
                console.error(&format!("{} failed: {}", stage.title(), e));
                tracing::error!(stage = stage.id(), error = %e, "Stage failed");
                StageStatus::Failed(e.to_string())
            }
        };

        reports.push(StageReport {
            id: stage.id(),
            title: stage.title(),
            status,
            actions: ctx.exec.stats().since(&before),
        });
    }

    reports
}

/// Get summary statistics from stage reports.
pub fn summarize(reports: &[StageReport]) -> SweepSummary {
    let mut summary = SweepSummary::default();

    for report in reports {
        match report.status {
            StageStatus::Completed => summary.completed += 1,
            StageStatus::Failed(_) => summary.failed += 1,
            StageStatus::Skipped(_) => summary.skipped += 1,
        }
        summary.actions.done += report.actions.done;
        summary.actions.failed += report.actions.failed;
        summary.actions.planned += report.actions.planned;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use crate::exec::CommandOutput;
    use crate::host::PackageManagerKind;
    use crate::stages::testing::Fixture;

    fn report(status: StageStatus, done: usize, failed: usize) -> StageReport {
        StageReport {
            id: "t",
            title: "T",
            status,
            actions: ActionStats {
                done,
                failed,
                planned: 0,
            },
        }
    }

    #[test]
    fn test_summarize() {
        let reports = vec![
            report(StageStatus::Completed, 3, 0),
            report(StageStatus::Completed, 1, 2),
            report(StageStatus::Failed("boom".into()), 0, 1),
            report(StageStatus::Skipped("off".into()), 0, 0),
        ];

        let summary = summarize(&reports);

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.actions.done, 4);
        assert_eq!(summary.actions.failed, 3);
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_string(&StageStatus::Skipped("kept".into())).unwrap();
        assert_eq!(json, r#"{"status":"skipped","detail":"kept"}"#);
        let json = serde_json::to_string(&StageStatus::Completed).unwrap();
        assert_eq!(json, r#"{"status":"completed"}"#);
    }

    #[test]
    fn test_pipeline_continues_after_failures() {
        let runner = RecordingRunner::new()
            .with_program("journalctl")
            .respond("journalctl", CommandOutput::failed(1, "journal unavailable"));
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, false);

        let registry = StageRegistry::without_ids(&["snap"]);
        let reports = run_stages(&registry, &fixture.ctx());

        assert_eq!(reports.len(), registry.len());
        assert_eq!(reports.last().map(|r| r.id), Some("final-sweep"));
        let journal = reports.iter().find(|r| r.id == "journal").unwrap();
        assert_eq!(journal.status, StageStatus::Completed);
        assert!(journal.actions.failed >= 2);
    }

    #[test]
    fn test_disabled_stage_is_reported_skipped() {
        let mut fixture = Fixture::new(PackageManagerKind::Apt, RecordingRunner::new(), false);
        fixture.run.remove_cloud_init = false;

        let registry = StageRegistry::new();
        let reports = run_stages(&registry, &fixture.ctx());

        let cloud = reports.iter().find(|r| r.id == "cloud-init").unwrap();
        assert!(matches!(cloud.status, StageStatus::Skipped(_)));
        assert!(!fixture.runner.calls().iter().any(|c| c.contains("cloud")));
    }
}
