//! Outcome of a teardown run

use std::time::Duration;

use tracebench_common::error::aggregate;
use tracebench_common::{Error, Result};

use super::TeardownPhase;

/// Result of running one phase
#[derive(Debug)]
pub struct PhaseOutcome {
    /// Which phase ran
    pub phase: TeardownPhase,
    /// Everything that went wrong, if anything did
    pub error: Option<Error>,
    /// Wall time spent in the phase
    pub elapsed: Duration,
}

impl PhaseOutcome {
    /// Whether the phase finished without errors
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-phase outcomes and counters for one teardown
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Namespace of the session that was torn down
    pub namespace: String,
    /// Outcomes in execution order
    pub phases: Vec<PhaseOutcome>,
    /// Custom resources whose deletion was accepted
    pub custom_resources_deleted: usize,
    /// Cluster-scoped resources whose deletion was accepted
    pub cluster_scoped_deleted: usize,
    /// Stuck resources whose finalizers were removed
    pub finalizers_stripped: usize,
    /// Persistent volumes deleted
    pub volumes_reclaimed: usize,
}

impl TeardownReport {
    /// Empty report for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, phase: TeardownPhase, error: Option<Error>, elapsed: Duration) {
        self.phases.push(PhaseOutcome {
            phase,
            error,
            elapsed,
        });
    }

    /// Outcome of `phase`, if it ran
    pub fn outcome(&self, phase: TeardownPhase) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|o| o.phase == phase)
    }

    /// Phases that recorded an error
    pub fn failed_phases(&self) -> Vec<TeardownPhase> {
        self.phases
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.phase)
            .collect()
    }

    /// Whether every phase finished without errors
    pub fn is_success(&self) -> bool {
        self.phases.iter().all(PhaseOutcome::is_success)
    }

    /// `Ok` if every phase succeeded, otherwise every phase error combined
    pub fn into_result(self) -> Result<()> {
        aggregate(
            self.phases
                .into_iter()
                .filter_map(|o| o.error.map(|e| Error::phase(o.phase.as_str(), e)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_success() {
        let report = TeardownReport::new("perf");
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn failures_are_wrapped_with_phase_names() {
        let mut report = TeardownReport::new("perf");
        report.record(TeardownPhase::DeleteCustomResources, None, Duration::ZERO);
        report.record(
            TeardownPhase::AwaitCustomResourceDeletion,
            Some(Error::timeout("custom resource deletion", Duration::from_secs(120))),
            Duration::from_secs(120),
        );
        report.record(
            TeardownPhase::ReclaimOrphanedVolumes,
            Some(Error::internal("list failed")),
            Duration::ZERO,
        );

        assert_eq!(
            report.failed_phases(),
            vec![
                TeardownPhase::AwaitCustomResourceDeletion,
                TeardownPhase::ReclaimOrphanedVolumes
            ]
        );
        assert!(report.outcome(TeardownPhase::DeleteCustomResources).unwrap().is_success());

        let err = report.into_result().unwrap_err();
        assert_eq!(err.failure_count(), 2);
        assert!(err.to_string().contains("AwaitCustomResourceDeletion phase"));
        assert!(err.leaves().iter().any(|e| e.is_timeout()));
    }
}
