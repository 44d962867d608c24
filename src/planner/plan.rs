//! Deployment plan types and construction.
//!
//! Planning resolves the selection, inspects every selected section and
//! classifies what the executor would do. It never mutates remote state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, ConfigStore, RuntimeSettings};
use crate::driver::{BuildContext, Desired, DesiredState, DriverSet, ObservedState, ResourceDriver};
use crate::error::{DeployError, DriverError, Result};
use crate::sections::{Request, SectionName, SectionRegistry, SkippedSection};

use super::diff::{DiffDetail, DiffEngine};

/// Base delay between retries; grows linearly with the attempt number.
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What the executor will do for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// The resource does not exist and will be created.
    Create,
    /// The resource exists and differs.
    Update,
    /// The resource matches the configuration.
    NoChange,
    /// The section is enabled but has nothing to manage.
    Skip,
    /// The remote state could not be read; nothing will be changed.
    InspectionFailed,
}

impl ActionKind {
    /// Returns true if executing the action calls `reconcile`.
    #[must_use]
    pub const fn is_change(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::NoChange => write!(f, "no change"),
            Self::Skip => write!(f, "skip"),
            Self::InspectionFailed => write!(f, "inspection failed"),
        }
    }
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Section the action belongs to.
    pub section: SectionName,
    /// Action type.
    pub kind: ActionKind,
    /// Desired state, with output references unresolved.
    pub desired: Desired,
    /// Observed state, `None` when the section was not inspected.
    pub observed: Option<ObservedState>,
    /// Differing attributes.
    pub diff: Vec<DiffDetail>,
    /// Sections that must succeed before this one runs.
    pub depends_on: Vec<SectionName>,
    /// Why the section is skipped or could not be inspected.
    pub reason: Option<String>,
}

impl PlannedAction {
    /// Human readable resource identifier.
    #[must_use]
    pub fn resource(&self) -> &str {
        match &self.desired {
            Desired::Managed(state) => &state.resource,
            Desired::Unmanaged { .. } => "-",
        }
    }
}

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Requested sections disabled by configuration.
    pub skipped: Vec<SkippedSection>,
    /// Sections added only as dependencies.
    pub implied: Vec<SectionName>,
    /// Digest of sections, kinds and changes; equal for equal plans.
    pub fingerprint: String,
}

impl Plan {
    /// Returns true if the plan has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of create and update actions.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.actions.iter().filter(|action| action.kind.is_change()).count()
    }

    /// Returns true if any section could not be inspected.
    #[must_use]
    pub fn has_inspection_failures(&self) -> bool {
        self.actions
            .iter()
            .any(|action| action.kind == ActionKind::InspectionFailed)
    }

    /// The action for a section, if planned.
    #[must_use]
    pub fn action(&self, section: SectionName) -> Option<&PlannedAction> {
        self.actions.iter().find(|action| action.section == section)
    }
}

/// Builds plans from configuration and live inspection.
#[derive(Debug)]
pub struct Planner {
    registry: SectionRegistry,
    drivers: DriverSet,
    settings: RuntimeSettings,
    engine: DiffEngine,
}

impl Planner {
    /// Creates a planner over a driver set.
    #[must_use]
    pub fn new(drivers: DriverSet, settings: RuntimeSettings) -> Self {
        Self {
            registry: SectionRegistry::new(),
            drivers,
            settings,
            engine: DiffEngine::new(),
        }
    }

    /// The section registry.
    #[must_use]
    pub const fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    /// The driver set.
    #[must_use]
    pub const fn drivers(&self) -> &DriverSet {
        &self.drivers
    }

    /// Builds a plan.
    ///
    /// # Errors
    ///
    /// Returns a `PlanError` for unknown or unsatisfiable sections and a
    /// `ConfigError` if a desired state cannot be derived. Inspection
    /// failures do not fail the plan.
    pub async fn plan(&self, config: &ConfigStore, request: &Request) -> Result<Plan> {
        let selection = self.registry.resolve(request, config)?;
        debug!("Planning sections: {:?}", selection.order);

        let mut staged = Vec::with_capacity(selection.order.len());
        for &section in &selection.order {
            let driver = self.drivers.get(section).cloned().ok_or_else(|| {
                DeployError::internal(format!("no driver registered for section '{section}'"))
            })?;
            let desired = driver.desired_state(config)?;
            staged.push((section, driver, desired));
        }

        let observed: Vec<Option<ObservedState>> = stream::iter(staged.iter())
            .map(|(section, driver, desired)| async move {
                match desired {
                    Desired::Managed(state) => Some(self.inspect(*section, driver, state).await),
                    Desired::Unmanaged { .. } => None,
                }
            })
            .buffered(self.settings.inspect_concurrency.max(1))
            .collect()
            .await;

        let mut context = BuildContext::new();
        let mut actions = Vec::with_capacity(staged.len());
        for ((section, _, desired), observed) in staged.into_iter().zip(observed) {
            let depends_on = selection.depends_on.get(&section).cloned().unwrap_or_default();
            let action = self.classify(section, desired, observed, depends_on, &context);
            if let Some(outputs) = action.observed.as_ref().and_then(ObservedState::outputs) {
                context.record(section, outputs);
            }
            actions.push(action);
        }

        let fingerprint = self.fingerprint(&actions);
        info!(
            "Planned {} section(s), {} change(s)",
            actions.len(),
            actions.iter().filter(|a| a.kind.is_change()).count()
        );
        Ok(Plan {
            actions,
            skipped: selection.skipped,
            implied: selection.implied,
            fingerprint,
        })
    }

    /// Inspects one section with timeout and retries. Failures become
    /// `ObservedState::Unknown`.
    async fn inspect(
        &self,
        section: SectionName,
        driver: &Arc<dyn ResourceDriver>,
        desired: &DesiredState,
    ) -> ObservedState {
        let retries = self.settings.inspect_retries;
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.settings.inspect_timeout, driver.inspect(desired))
                .await
                .unwrap_or_else(|_| {
                    Err(DriverError::Timeout {
                        operation: format!("inspecting {section}"),
                        after: self.settings.inspect_timeout,
                    })
                });
            match result {
                Ok(observed) => return observed,
                Err(err) if err.is_retryable() && attempt < retries => {
                    attempt += 1;
                    warn!("Inspecting {section} failed ({err}), retry {attempt}/{retries}");
                    tokio::time::sleep(RETRY_BACKOFF * u32::try_from(attempt).unwrap_or(u32::MAX)).await;
                }
                Err(err) => {
                    warn!("Inspecting {section} failed: {err}");
                    return ObservedState::Unknown {
                        reason: err.to_string(),
                    };
                }
            }
        }
    }

    fn classify(
        &self,
        section: SectionName,
        desired: Desired,
        observed: Option<ObservedState>,
        depends_on: Vec<SectionName>,
        context: &BuildContext,
    ) -> PlannedAction {
        let (kind, diff, reason) = match (&desired, &observed) {
            (Desired::Unmanaged { reason }, _) => (ActionKind::Skip, Vec::new(), Some(reason.clone())),
            (Desired::Managed(_), None) => (ActionKind::Skip, Vec::new(), None),
            (Desired::Managed(_), Some(ObservedState::Unknown { reason })) => {
                (ActionKind::InspectionFailed, Vec::new(), Some(reason.clone()))
            }
            (Desired::Managed(state), Some(ObservedState::Absent)) => {
                let diff = self.engine.diff(&context.resolve(state), &Default::default());
                (ActionKind::Create, diff, None)
            }
            (Desired::Managed(state), Some(ObservedState::Present { attributes, .. })) => {
                let diff = self.engine.diff(&context.resolve(state), attributes);
                let kind = if diff.is_empty() {
                    ActionKind::NoChange
                } else {
                    ActionKind::Update
                };
                (kind, diff, None)
            }
        };
        debug!("{section}: {kind}");

        PlannedAction {
            section,
            kind,
            desired,
            observed,
            diff,
            depends_on,
            reason,
        }
    }

    fn fingerprint(&self, actions: &[PlannedAction]) -> String {
        let mut fields = Vec::new();
        for action in actions {
            fields.push(action.section.to_string());
            fields.push(action.kind.to_string());
            for detail in &action.diff {
                fields.push(detail.field.clone());
                fields.push(
                    detail
                        .new
                        .as_ref()
                        .map(|value| self.engine.fingerprint_value(value))
                        .unwrap_or_default(),
                );
            }
        }
        ConfigHasher::new().fingerprint(fields.iter().map(String::as_str))
    }
}
