//! Plan executor for applying deployment plans.
//!
//! Actions run strictly in plan order. A failed action does not stop
//! independent sections, but everything that depends on it is skipped.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::RuntimeSettings;
use crate::driver::{BuildContext, Desired, DriverSet, ObservedState, Outputs};
use crate::error::humanize;
use crate::sections::SectionName;

use super::plan::{ActionKind, Plan, PlannedAction, RETRY_BACKOFF};

/// Execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Record every action as skipped without calling any driver.
    pub dry_run: bool,
    /// Time allowed for one reconcile, retries included.
    pub per_action_timeout: Duration,
    /// Halt after the first failed action.
    pub stop_on_first_failure: bool,
    /// Retries for retryable reconcile errors.
    pub reconcile_retries: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl ExecuteOptions {
    /// Options derived from run settings.
    #[must_use]
    pub const fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            dry_run: false,
            per_action_timeout: settings.action_timeout,
            stop_on_first_failure: settings.stop_on_first_failure,
            reconcile_retries: settings.reconcile_retries,
        }
    }
}

/// Triggers cancellation of a run.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

/// Observes cancellation of a run.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Creates a handle that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// A signal following this handle.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Cancels the run. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        CancelHandle::new().signal()
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when cancellation is requested; never completes if the
    /// handle is gone without firing.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why an action was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Dry run.
    DryRun,
    /// The section has nothing to manage.
    NotManaged,
    /// A section this one depends on failed or was skipped for that reason.
    DependencyFailed(SectionName),
    /// The run was cancelled before the action started.
    Cancelled,
    /// An earlier failure halted the run.
    Halted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry run"),
            Self::NotManaged => write!(f, "not managed"),
            Self::DependencyFailed(section) => write!(f, "dependency '{section}' failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Halted => write!(f, "halted after an earlier failure"),
        }
    }
}

/// Why an action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The driver reported an error.
    Reconcile(String),
    /// The action exceeded its timeout.
    Timeout(Duration),
    /// The remote state could not be read during planning.
    InspectionFailed(String),
    /// The run was cancelled while the action was in flight.
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile(message) => f.write_str(message),
            Self::Timeout(after) => write!(f, "timed out after {}", humanize(*after)),
            Self::InspectionFailed(message) => write!(f, "inspection failed: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The driver reconciled the resource.
    Applied,
    /// Nothing needed to change.
    NoChangeNeeded,
    /// The action was not attempted.
    Skipped(SkipReason),
    /// The action failed.
    Failed(FailureCause),
}

impl Outcome {
    /// Returns true for `Failed`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short status label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NoChangeNeeded => "no change",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// Skip reason or failure cause, if any.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Applied | Self::NoChangeNeeded => None,
            Self::Skipped(reason) => Some(reason.to_string()),
            Self::Failed(cause) => Some(cause.to_string()),
        }
    }

    /// Returns true if downstream sections must not run.
    const fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Skipped(SkipReason::DependencyFailed(_))
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} ({detail})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Result of executing one action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Section.
    pub section: SectionName,
    /// Planned action type.
    pub kind: ActionKind,
    /// Outcome.
    pub outcome: Outcome,
    /// Wall time spent on the action.
    pub duration: Duration,
    /// Reconcile attempts made.
    pub attempts: usize,
    /// Outputs produced by the driver.
    pub outputs: Outputs,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct Report {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// One result per planned action, in plan order.
    pub results: Vec<ActionResult>,
    /// True if no action failed.
    pub success: bool,
}

impl Report {
    /// Number of results with the given label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.results
            .iter()
            .filter(|result| result.outcome.label() == label)
            .count()
    }

    /// Returns true if the operator cancelled the run.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.results.iter().any(|result| {
            matches!(
                result.outcome,
                Outcome::Failed(FailureCause::Cancelled) | Outcome::Skipped(SkipReason::Cancelled)
            )
        })
    }

    /// Result for a section.
    #[must_use]
    pub fn result(&self, section: SectionName) -> Option<&ActionResult> {
        self.results.iter().find(|result| result.section == section)
    }
}

/// Executor for deployment plans.
#[derive(Debug)]
pub struct Executor {
    drivers: DriverSet,
    options: ExecuteOptions,
}

impl Executor {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(drivers: DriverSet, options: ExecuteOptions) -> Self {
        Self { drivers, options }
    }

    /// Execution options.
    #[must_use]
    pub const fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Executes a plan. Never fails as a whole: every action gets a result.
    pub async fn execute(&self, plan: &Plan, cancel: &CancelSignal) -> Report {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(
            "Executing plan with {} action(s) (run {run_id}{})",
            plan.actions.len(),
            if self.options.dry_run { ", dry run" } else { "" }
        );

        let mut context = BuildContext::new();
        let mut blocked: BTreeSet<SectionName> = BTreeSet::new();
        let mut halted = false;
        let mut results = Vec::with_capacity(plan.actions.len());

        for action in &plan.actions {
            let span = info_span!("section", name = %action.section);
            let started = Instant::now();

            let (outcome, attempts, outputs) = if self.options.dry_run {
                (Outcome::Skipped(SkipReason::DryRun), 0, Outputs::new())
            } else if cancel.is_cancelled() {
                (Outcome::Skipped(SkipReason::Cancelled), 0, Outputs::new())
            } else if halted {
                (Outcome::Skipped(SkipReason::Halted), 0, Outputs::new())
            } else if let Some(&dependency) =
                action.depends_on.iter().find(|dep| blocked.contains(dep))
            {
                (
                    Outcome::Skipped(SkipReason::DependencyFailed(dependency)),
                    0,
                    Outputs::new(),
                )
            } else {
                self.run_action(action, &mut context, cancel)
                    .instrument(span.clone())
                    .await
            };

            span.in_scope(|| match &outcome {
                Outcome::Failed(cause) => error!("{} failed: {cause}", action.section),
                Outcome::Skipped(reason) => debug!("{} skipped: {reason}", action.section),
                Outcome::Applied => info!("{} applied", action.section),
                Outcome::NoChangeNeeded => debug!("{} unchanged", action.section),
            });

            if outcome.blocks_dependents() {
                blocked.insert(action.section);
            }
            if outcome.is_failure() && self.options.stop_on_first_failure {
                halted = true;
            }
            results.push(ActionResult {
                section: action.section,
                kind: action.kind,
                outcome,
                duration: started.elapsed(),
                attempts,
                outputs,
            });
        }

        let success = !results.iter().any(|result| result.outcome.is_failure());
        Report {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: self.options.dry_run,
            results,
            success,
        }
    }

    async fn run_action(
        &self,
        action: &PlannedAction,
        context: &mut BuildContext,
        cancel: &CancelSignal,
    ) -> (Outcome, usize, Outputs) {
        match action.kind {
            ActionKind::Skip => (Outcome::Skipped(SkipReason::NotManaged), 0, Outputs::new()),
            ActionKind::NoChange => {
                if let Some(outputs) = action.observed.as_ref().and_then(ObservedState::outputs) {
                    context.record(action.section, outputs);
                }
                (Outcome::NoChangeNeeded, 0, Outputs::new())
            }
            ActionKind::InspectionFailed => {
                let reason = action.reason.clone().unwrap_or_default();
                (
                    Outcome::Failed(FailureCause::InspectionFailed(reason)),
                    0,
                    Outputs::new(),
                )
            }
            ActionKind::Create | ActionKind::Update => self.reconcile(action, context, cancel).await,
        }
    }

    async fn reconcile(
        &self,
        action: &PlannedAction,
        context: &mut BuildContext,
        cancel: &CancelSignal,
    ) -> (Outcome, usize, Outputs) {
        let section = action.section;
        let Some(driver) = self.drivers.get(section) else {
            return (
                Outcome::Failed(FailureCause::Reconcile(format!("no driver for '{section}'"))),
                0,
                Outputs::new(),
            );
        };
        let Desired::Managed(desired) = &action.desired else {
            return (Outcome::Skipped(SkipReason::NotManaged), 0, Outputs::new());
        };
        let resolved = match context.resolve_all(desired) {
            Ok(resolved) => resolved,
            Err(err) => {
                return (
                    Outcome::Failed(FailureCause::Reconcile(err.to_string())),
                    0,
                    Outputs::new(),
                );
            }
        };

        info!("Applying {} to {}", action.kind, resolved.resource);
        let timeout = self.options.per_action_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let call = tokio::time::timeout_at(deadline, driver.reconcile(&resolved, context));
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Cancelled while applying {section}");
                    return (Outcome::Failed(FailureCause::Cancelled), attempts, Outputs::new());
                }
                result = call => result,
            };

            match result {
                Err(_) => {
                    return (Outcome::Failed(FailureCause::Timeout(timeout)), attempts, Outputs::new());
                }
                Ok(Ok(outputs)) => {
                    context.record(section, &outputs);
                    return (Outcome::Applied, attempts, outputs);
                }
                Ok(Err(err)) if err.is_retryable() && attempts <= self.options.reconcile_retries => {
                    warn!(
                        "Applying {section} failed ({err}), retry {attempts}/{}",
                        self.options.reconcile_retries
                    );
                    let backoff = RETRY_BACKOFF * u32::try_from(attempts).unwrap_or(u32::MAX);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return (Outcome::Failed(FailureCause::Cancelled), attempts, Outputs::new());
                        }
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
                Ok(Err(err)) => {
                    return (
                        Outcome::Failed(FailureCause::Reconcile(err.to_string())),
                        attempts,
                        Outputs::new(),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{CallLog, FakeDriver, fake_set};
    use crate::driver::{Attribute, Attributes, DesiredState};
    use std::sync::{Arc, Mutex};

    fn action(section: SectionName, kind: ActionKind, depends_on: &[SectionName]) -> PlannedAction {
        PlannedAction {
            section,
            kind,
            desired: Desired::Managed(DesiredState::new(section.as_str()).with_plain("version", "1")),
            observed: Some(ObservedState::Absent),
            diff: Vec::new(),
            depends_on: depends_on.to_vec(),
            reason: None,
        }
    }

    fn plan(actions: Vec<PlannedAction>) -> Plan {
        Plan {
            actions,
            skipped: Vec::new(),
            implied: Vec::new(),
            fingerprint: String::new(),
        }
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            dry_run: false,
            per_action_timeout: Duration::from_secs(5),
            stop_on_first_failure: false,
            reconcile_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_empty_plan_succeeds() {
        let (drivers, _) = fake_set(Vec::new());
        let report = Executor::new(drivers, options())
            .execute(&plan(Vec::new()), &CancelSignal::never())
            .await;
        assert!(report.success);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_never_reconciles() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Secrets),
            FakeDriver::new(SectionName::Backend),
        ]);
        let executor = Executor::new(drivers, ExecuteOptions { dry_run: true, ..options() });
        let report = executor
            .execute(
                &plan(vec![
                    action(SectionName::Secrets, ActionKind::Create, &[]),
                    action(SectionName::Backend, ActionKind::Update, &[SectionName::Secrets]),
                ]),
                &CancelSignal::never(),
            )
            .await;

        assert!(report.dry_run);
        assert!(report
            .results
            .iter()
            .all(|result| result.outcome == Outcome::Skipped(SkipReason::DryRun)));
        assert!(handles.iter().all(|driver| driver.reconcile_calls() == 0));
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Bq).fail_reconcile("quota exceeded"),
            FakeDriver::new(SectionName::Gcs),
            FakeDriver::new(SectionName::Backend),
            FakeDriver::new(SectionName::Frontend),
        ]);
        let report = Executor::new(drivers, options())
            .execute(
                &plan(vec![
                    action(SectionName::Bq, ActionKind::Create, &[]),
                    action(SectionName::Gcs, ActionKind::Create, &[]),
                    action(SectionName::Backend, ActionKind::Update, &[SectionName::Bq]),
                    action(SectionName::Frontend, ActionKind::Update, &[SectionName::Backend]),
                ]),
                &CancelSignal::never(),
            )
            .await;

        assert!(!report.success);
        assert!(matches!(
            report.result(SectionName::Bq).unwrap().outcome,
            Outcome::Failed(FailureCause::Reconcile(_))
        ));
        assert_eq!(report.result(SectionName::Gcs).unwrap().outcome, Outcome::Applied);
        assert_eq!(
            report.result(SectionName::Backend).unwrap().outcome,
            Outcome::Skipped(SkipReason::DependencyFailed(SectionName::Bq))
        );
        assert_eq!(
            report.result(SectionName::Frontend).unwrap().outcome,
            Outcome::Skipped(SkipReason::DependencyFailed(SectionName::Backend))
        );
        assert_eq!(handles[1].reconcile_calls(), 1);
        assert_eq!(handles[2].reconcile_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_on_first_failure_halts() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Bq).fail_reconcile("boom"),
            FakeDriver::new(SectionName::Gcs),
        ]);
        let executor = Executor::new(
            drivers,
            ExecuteOptions {
                stop_on_first_failure: true,
                ..options()
            },
        );
        let report = executor
            .execute(
                &plan(vec![
                    action(SectionName::Bq, ActionKind::Create, &[]),
                    action(SectionName::Gcs, ActionKind::Create, &[]),
                ]),
                &CancelSignal::never(),
            )
            .await;
        assert_eq!(
            report.result(SectionName::Gcs).unwrap().outcome,
            Outcome::Skipped(SkipReason::Halted)
        );
        assert_eq!(handles[1].reconcile_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_change_and_inspection_failure_do_not_reconcile() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Secrets),
            FakeDriver::new(SectionName::Sql),
            FakeDriver::new(SectionName::Gcs),
        ]);
        let mut failed = action(SectionName::Sql, ActionKind::InspectionFailed, &[]);
        failed.reason = Some(String::from("instance main-pg does not exist"));
        let mut unmanaged = action(SectionName::Gcs, ActionKind::Skip, &[]);
        unmanaged.desired = Desired::Unmanaged {
            reason: String::from("nothing to do"),
        };

        let report = Executor::new(drivers, options())
            .execute(
                &plan(vec![action(SectionName::Secrets, ActionKind::NoChange, &[]), failed, unmanaged]),
                &CancelSignal::never(),
            )
            .await;

        assert_eq!(report.results[0].outcome, Outcome::NoChangeNeeded);
        assert!(matches!(
            report.results[1].outcome,
            Outcome::Failed(FailureCause::InspectionFailed(_))
        ));
        assert_eq!(report.results[2].outcome, Outcome::Skipped(SkipReason::NotManaged));
        assert!(handles.iter().all(|driver| driver.reconcile_calls() == 0));
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_actions_run_in_plan_order() {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let (drivers, _) = fake_set(vec![
            FakeDriver::new(SectionName::Secrets).log(&log),
            FakeDriver::new(SectionName::Backend).log(&log),
            FakeDriver::new(SectionName::Frontend).log(&log),
        ]);
        Executor::new(drivers, options())
            .execute(
                &plan(vec![
                    action(SectionName::Secrets, ActionKind::Create, &[]),
                    action(SectionName::Backend, ActionKind::Create, &[SectionName::Secrets]),
                    action(SectionName::Frontend, ActionKind::Create, &[SectionName::Backend]),
                ]),
                &CancelSignal::never(),
            )
            .await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![SectionName::Secrets, SectionName::Backend, SectionName::Frontend]
        );
    }

    #[tokio::test]
    async fn test_outputs_flow_to_later_sections() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Backend).outputs(&[("url", "https://api.run.app")]),
            FakeDriver::new(SectionName::Frontend),
        ]);
        let mut frontend = action(SectionName::Frontend, ActionKind::Create, &[SectionName::Backend]);
        frontend.desired = Desired::Managed(
            DesiredState::new("frontend").with("api_url", Attribute::Output(String::from("backend.url"))),
        );

        let report = Executor::new(drivers, options())
            .execute(
                &plan(vec![action(SectionName::Backend, ActionKind::Update, &[]), frontend]),
                &CancelSignal::never(),
            )
            .await;
        assert!(report.success);
        let seen = handles[1].reconciled();
        assert_eq!(seen[0].value("api_url"), Some("https://api.run.app"));
    }

    #[tokio::test]
    async fn test_unchanged_upstream_still_provides_outputs() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Backend),
            FakeDriver::new(SectionName::Frontend),
        ]);
        let mut backend = action(SectionName::Backend, ActionKind::NoChange, &[]);
        backend.observed = Some(ObservedState::Present {
            attributes: Attributes::new(),
            outputs: Outputs::from([(String::from("url"), String::from("https://live.run.app"))]),
        });
        let mut frontend = action(SectionName::Frontend, ActionKind::Update, &[SectionName::Backend]);
        frontend.desired = Desired::Managed(
            DesiredState::new("frontend").with("api_url", Attribute::Output(String::from("backend.url"))),
        );

        Executor::new(drivers, options())
            .execute(&plan(vec![backend, frontend]), &CancelSignal::never())
            .await;
        assert_eq!(handles[1].reconciled()[0].value("api_url"), Some("https://live.run.app"));
    }

    #[tokio::test]
    async fn test_unresolved_output_fails_the_action() {
        let (drivers, handles) = fake_set(vec![FakeDriver::new(SectionName::Frontend)]);
        let mut frontend = action(SectionName::Frontend, ActionKind::Create, &[]);
        frontend.desired = Desired::Managed(
            DesiredState::new("frontend").with("api_url", Attribute::Output(String::from("backend.url"))),
        );
        let report = Executor::new(drivers, options())
            .execute(&plan(vec![frontend]), &CancelSignal::never())
            .await;
        assert!(report.results[0].outcome.is_failure());
        assert_eq!(handles[0].reconcile_calls(), 0);
    }

    #[tokio::test]
    async fn test_action_timeout() {
        let (drivers, _) = fake_set(vec![
            FakeDriver::new(SectionName::Backend).reconcile_delay(Duration::from_secs(10)),
        ]);
        let executor = Executor::new(
            drivers,
            ExecuteOptions {
                per_action_timeout: Duration::from_millis(50),
                ..options()
            },
        );
        let report = executor
            .execute(
                &plan(vec![action(SectionName::Backend, ActionKind::Create, &[])]),
                &CancelSignal::never(),
            )
            .await;
        assert_eq!(
            report.results[0].outcome,
            Outcome::Failed(FailureCause::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Backend).fail_reconcile_transiently(1),
        ]);
        let executor = Executor::new(
            drivers,
            ExecuteOptions {
                reconcile_retries: 1,
                ..options()
            },
        );
        let report = executor
            .execute(
                &plan(vec![action(SectionName::Backend, ActionKind::Create, &[])]),
                &CancelSignal::never(),
            )
            .await;
        assert_eq!(report.results[0].outcome, Outcome::Applied);
        assert_eq!(report.results[0].attempts, 2);
        assert_eq!(handles[0].reconcile_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_fails_in_flight_and_skips_rest() {
        let (drivers, handles) = fake_set(vec![
            FakeDriver::new(SectionName::Backend).reconcile_delay(Duration::from_secs(10)),
            FakeDriver::new(SectionName::Frontend),
        ]);
        let handle = CancelHandle::new();
        let signal = handle.signal();
        let cancel_later = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let report = Executor::new(drivers, options())
            .execute(
                &plan(vec![
                    action(SectionName::Backend, ActionKind::Create, &[]),
                    action(SectionName::Gcs, ActionKind::Create, &[]),
                ]),
                &signal,
            )
            .await;
        cancel_later.await.unwrap();

        assert_eq!(report.results[0].outcome, Outcome::Failed(FailureCause::Cancelled));
        assert_eq!(report.results[1].outcome, Outcome::Skipped(SkipReason::Cancelled));
        assert!(report.was_cancelled());
        assert_eq!(handles[1].reconcile_calls(), 0);
    }
}
