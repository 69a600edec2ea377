/// Step sequencing and rollback
///
/// The sequencer executes an ordered list of install steps, keeping two
/// pieces of state: the completed-step log (append-only while moving
/// forward, read-only in reverse during unwind) and the identity of the
/// step currently executing. A step appears in the log if and only if its
/// forward action returned success; the log is the sole source of truth for
/// what must be compensated when a later step fails.

use async_trait::async_trait;
use std::fmt;
use tracing::{error, info, warn};

use crate::core::error::InstallError;

/// Identity of one unit of forward setup work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ToolInstall,
    RuntimeInstall,
    OrchestratorInstall,
    KernelTuning,
    BundleFetch,
    EnvConfig,
    StackStart,
    HealthCheck,
}

impl Step {
    /// Forward execution order.
    pub const ALL: [Step; 8] = [
        Step::ToolInstall,
        Step::RuntimeInstall,
        Step::OrchestratorInstall,
        Step::KernelTuning,
        Step::BundleFetch,
        Step::EnvConfig,
        Step::StackStart,
        Step::HealthCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::ToolInstall => "tool-install",
            Step::RuntimeInstall => "runtime-install",
            Step::OrchestratorInstall => "orchestrator-install",
            Step::KernelTuning => "kernel-tuning",
            Step::BundleFetch => "bundle-fetch",
            Step::EnvConfig => "env-config",
            Step::StackStart => "stack-start",
            Step::HealthCheck => "health-check",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one compensating action.
#[derive(Debug)]
pub enum UnwindOutcome {
    /// The compensation ran and the step's effects were reverted.
    Undone,
    /// No compensation exists for this step; the reason says why. This is
    /// an explicit acknowledgement, never a silent skip.
    CannotUndo(&'static str),
    /// The compensation was attempted and failed; unwind continues.
    Failed(anyhow::Error),
}

/// One forward action plus its compensating action.
///
/// Implementations decide idempotency for themselves (checking current host
/// state before acting). `unwind` must be safe to call only after `apply`
/// reported success — the sequencer guarantees that ordering.
#[async_trait]
pub trait InstallStep: Send {
    fn id(&self) -> Step;
    async fn apply(&mut self) -> Result<(), InstallError>;
    async fn unwind(&mut self) -> UnwindOutcome;
}

/// Record of one compensation attempt during unwind.
#[derive(Debug)]
pub struct CompensationRecord {
    pub step: Step,
    pub outcome: UnwindOutcome,
}

/// Typed result of a full run, returned to the single top-level caller
/// which performs the actual process exit.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        steps: Vec<Step>,
    },
    Unwound {
        failed: Step,
        error: InstallError,
        compensations: Vec<CompensationRecord>,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } => 0,
            RunOutcome::Unwound { .. } => 1,
        }
    }
}

/// Drives steps forward and unwinds on failure.
#[derive(Default)]
pub struct Sequencer {
    completed: Vec<Step>,
    current: Option<Step>,
    unwound: bool,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-populated completed-step log. Used by
    /// uninstall, which replays the full compensation chain without running
    /// anything forward.
    pub fn with_completed(completed: Vec<Step>) -> Self {
        Self {
            completed,
            current: None,
            unwound: false,
        }
    }

    /// The completed-step log, in insertion order.
    pub fn completed(&self) -> &[Step] {
        &self.completed
    }

    /// The step currently executing, if any. A step that fails mid-action
    /// shows up here but never in the completed log.
    pub fn current(&self) -> Option<Step> {
        self.current
    }

    /// Execute the steps in order. On the first failure, unwind everything
    /// completed so far and return the unwound outcome; forward execution
    /// never resumes.
    pub async fn run(&mut self, steps: &mut [Box<dyn InstallStep>]) -> RunOutcome {
        let mut failure: Option<(Step, InstallError)> = None;

        for i in 0..steps.len() {
            let id = steps[i].id();
            self.current = Some(id);
            info!(step = id.name(), "starting step");

            match steps[i].apply().await {
                Ok(()) => {
                    self.completed.push(id);
                    info!(step = id.name(), "step completed");
                }
                Err(err) => {
                    error!(step = id.name(), error = %err, "step failed");
                    failure = Some((id, err));
                    break;
                }
            }
        }

        match failure {
            None => {
                self.current = None;
                RunOutcome::Completed {
                    steps: self.completed.clone(),
                }
            }
            Some((failed, error)) => {
                let compensations = self.unwind(steps).await;
                RunOutcome::Unwound {
                    failed,
                    error,
                    compensations,
                }
            }
        }
    }

    /// Visit the completed-step log in strict reverse order and attempt the
    /// compensating action for every entry exactly once. Individual
    /// compensation failures are recorded and do not stop the unwind.
    ///
    /// Guarded against re-entry: a sequencer unwinds at most once.
    pub async fn unwind(&mut self, steps: &mut [Box<dyn InstallStep>]) -> Vec<CompensationRecord> {
        if self.unwound {
            warn!("unwind already ran for this sequencer; refusing to re-enter");
            return Vec::new();
        }
        self.unwound = true;

        let mut records = Vec::with_capacity(self.completed.len());

        for idx in (0..self.completed.len()).rev() {
            let step_id = self.completed[idx];
            let Some(step) = steps.iter_mut().find(|s| s.id() == step_id) else {
                warn!(step = step_id.name(), "no handler for completed step");
                continue;
            };

            let outcome = step.unwind().await;
            match &outcome {
                UnwindOutcome::Undone => {
                    info!(step = step_id.name(), "compensation applied");
                }
                UnwindOutcome::CannotUndo(reason) => {
                    warn!(step = step_id.name(), reason, "cannot undo");
                }
                UnwindOutcome::Failed(err) => {
                    error!(step = step_id.name(), error = %err, "compensation failed; continuing");
                }
            }
            records.push(CompensationRecord {
                step: step_id,
                outcome,
            });
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    /// What a fake step's compensation should report.
    #[derive(Clone, Copy)]
    enum FakeUnwind {
        Undone,
        CannotUndo,
        Failed,
    }

    struct FakeStep {
        id: Step,
        fail_apply: bool,
        unwind_kind: FakeUnwind,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl FakeStep {
        fn ok(id: Step, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn InstallStep> {
            Box::new(Self {
                id,
                fail_apply: false,
                unwind_kind: FakeUnwind::Undone,
                journal: journal.clone(),
            })
        }

        fn failing(id: Step, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn InstallStep> {
            Box::new(Self {
                id,
                fail_apply: true,
                unwind_kind: FakeUnwind::Undone,
                journal: journal.clone(),
            })
        }

        fn with_unwind(
            id: Step,
            unwind_kind: FakeUnwind,
            journal: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn InstallStep> {
            Box::new(Self {
                id,
                fail_apply: false,
                unwind_kind,
                journal: journal.clone(),
            })
        }
    }

    #[async_trait]
    impl InstallStep for FakeStep {
        fn id(&self) -> Step {
            self.id
        }

        async fn apply(&mut self) -> Result<(), InstallError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("apply:{}", self.id));
            if self.fail_apply {
                Err(InstallError::MissingPrerequisite(format!(
                    "{} exploded",
                    self.id
                )))
            } else {
                Ok(())
            }
        }

        async fn unwind(&mut self) -> UnwindOutcome {
            self.journal
                .lock()
                .unwrap()
                .push(format!("unwind:{}", self.id));
            match self.unwind_kind {
                FakeUnwind::Undone => UnwindOutcome::Undone,
                FakeUnwind::CannotUndo => UnwindOutcome::CannotUndo("nothing to remove"),
                FakeUnwind::Failed => UnwindOutcome::Failed(anyhow!("compensation broke")),
            }
        }
    }

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn all_steps_complete_in_order() {
        let j = journal();
        let mut steps = vec![
            FakeStep::ok(Step::ToolInstall, &j),
            FakeStep::ok(Step::RuntimeInstall, &j),
            FakeStep::ok(Step::KernelTuning, &j),
        ];

        let mut seq = Sequencer::new();
        let outcome = seq.run(&mut steps).await;

        match &outcome {
            RunOutcome::Completed { steps } => {
                assert_eq!(
                    steps,
                    &vec![Step::ToolInstall, Step::RuntimeInstall, Step::KernelTuning]
                );
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(seq.current(), None);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn log_holds_exactly_the_steps_before_first_failure() {
        // steps 1,2 succeed, step 3 fails -> log == [1, 2]
        let j = journal();
        let mut steps = vec![
            FakeStep::ok(Step::ToolInstall, &j),
            FakeStep::ok(Step::RuntimeInstall, &j),
            FakeStep::failing(Step::OrchestratorInstall, &j),
            FakeStep::ok(Step::KernelTuning, &j),
        ];

        let mut seq = Sequencer::new();
        let outcome = seq.run(&mut steps).await;

        assert_eq!(seq.completed(), &[Step::ToolInstall, Step::RuntimeInstall]);
        match &outcome {
            RunOutcome::Unwound { failed, .. } => assert_eq!(*failed, Step::OrchestratorInstall),
            other => panic!("expected Unwound, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 1);

        // step 4 never ran forward
        let entries = j.lock().unwrap();
        assert!(!entries.contains(&"apply:kernel-tuning".to_string()));
    }

    #[tokio::test]
    async fn unwind_visits_completed_steps_in_reverse_order() {
        let j = journal();
        let mut steps = vec![
            FakeStep::ok(Step::ToolInstall, &j),
            FakeStep::ok(Step::RuntimeInstall, &j),
            FakeStep::failing(Step::OrchestratorInstall, &j),
        ];

        let mut seq = Sequencer::new();
        seq.run(&mut steps).await;

        let entries = j.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "apply:tool-install",
                "apply:runtime-install",
                "apply:orchestrator-install",
                "unwind:runtime-install",
                "unwind:tool-install",
            ]
        );
    }

    #[tokio::test]
    async fn failed_compensation_does_not_stop_the_unwind() {
        let j = journal();
        let mut steps = vec![
            FakeStep::with_unwind(Step::ToolInstall, FakeUnwind::Undone, &j),
            FakeStep::with_unwind(Step::RuntimeInstall, FakeUnwind::Failed, &j),
            FakeStep::with_unwind(Step::KernelTuning, FakeUnwind::Undone, &j),
            FakeStep::failing(Step::BundleFetch, &j),
        ];

        let mut seq = Sequencer::new();
        let outcome = seq.run(&mut steps).await;

        let RunOutcome::Unwound { compensations, .. } = outcome else {
            panic!("expected Unwound");
        };

        // every completed step compensated exactly once, in reverse order,
        // regardless of the failure in the middle
        let visited: Vec<Step> = compensations.iter().map(|r| r.step).collect();
        assert_eq!(
            visited,
            vec![Step::KernelTuning, Step::RuntimeInstall, Step::ToolInstall]
        );
        assert!(matches!(
            compensations[1].outcome,
            UnwindOutcome::Failed(_)
        ));
        assert!(matches!(compensations[2].outcome, UnwindOutcome::Undone));

        let entries = j.lock().unwrap();
        let unwinds: Vec<&String> =
            entries.iter().filter(|e| e.starts_with("unwind:")).collect();
        assert_eq!(unwinds.len(), 3);
    }

    #[tokio::test]
    async fn each_compensation_attempted_exactly_once() {
        let j = journal();
        let mut steps = vec![
            FakeStep::ok(Step::ToolInstall, &j),
            FakeStep::ok(Step::RuntimeInstall, &j),
            FakeStep::failing(Step::KernelTuning, &j),
        ];

        let mut seq = Sequencer::new();
        seq.run(&mut steps).await;

        let entries = j.lock().unwrap();
        let count = |needle: &str| entries.iter().filter(|e| *e == needle).count();
        assert_eq!(count("unwind:tool-install"), 1);
        assert_eq!(count("unwind:runtime-install"), 1);
        assert_eq!(count("unwind:kernel-tuning"), 0);
    }

    #[tokio::test]
    async fn unwind_is_not_reentrant() {
        let j = journal();
        let mut steps = vec![
            FakeStep::ok(Step::ToolInstall, &j),
            FakeStep::failing(Step::RuntimeInstall, &j),
        ];

        let mut seq = Sequencer::new();
        seq.run(&mut steps).await;

        let before = j.lock().unwrap().len();
        // a second unwind must be refused outright
        let records = seq.unwind(&mut steps).await;
        assert!(records.is_empty());
        assert_eq!(j.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn cannot_undo_is_reported_explicitly() {
        let j = journal();
        let mut steps = vec![
            FakeStep::with_unwind(Step::ToolInstall, FakeUnwind::CannotUndo, &j),
            FakeStep::failing(Step::RuntimeInstall, &j),
        ];

        let mut seq = Sequencer::new();
        let outcome = seq.run(&mut steps).await;

        let RunOutcome::Unwound { compensations, .. } = outcome else {
            panic!("expected Unwound");
        };
        assert_eq!(compensations.len(), 1);
        match &compensations[0].outcome {
            UnwindOutcome::CannotUndo(reason) => assert_eq!(*reason, "nothing to remove"),
            other => panic!("expected CannotUndo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn with_completed_replays_full_chain_in_reverse() {
        let j = journal();
        let mut steps: Vec<Box<dyn InstallStep>> = Step::ALL
            .iter()
            .map(|id| FakeStep::ok(*id, &j))
            .collect();

        let mut seq = Sequencer::with_completed(Step::ALL.to_vec());
        let records = seq.unwind(&mut steps).await;

        let visited: Vec<Step> = records.iter().map(|r| r.step).collect();
        let mut expected = Step::ALL.to_vec();
        expected.reverse();
        assert_eq!(visited, expected);
    }
}
