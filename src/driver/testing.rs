//! In-memory driver for planner and executor tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConfigStore;
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

use super::{BuildContext, Desired, DesiredState, DriverSet, ObservedState, Outputs, ResourceDriver};

/// Shared record of reconcile calls across drivers, in call order.
pub(crate) type CallLog = Arc<Mutex<Vec<SectionName>>>;

/// Scripted driver with call counters.
#[derive(Debug)]
pub(crate) struct FakeDriver {
    section: SectionName,
    desired: Desired,
    observed: ObservedState,
    outputs: Outputs,
    inspect_delay: Option<Duration>,
    reconcile_delay: Option<Duration>,
    transient_inspect_failures: AtomicUsize,
    transient_reconcile_failures: AtomicUsize,
    inspect_error: Option<String>,
    reconcile_error: Option<String>,
    inspect_calls: AtomicUsize,
    reconcile_calls: AtomicUsize,
    reconciled: Mutex<Vec<DesiredState>>,
    log: Option<CallLog>,
}

impl FakeDriver {
    /// A managed section that does not exist yet and reconciles cleanly.
    pub(crate) fn new(section: SectionName) -> Self {
        Self {
            section,
            desired: Desired::Managed(
                DesiredState::new(section.as_str()).with_plain("version", "1"),
            ),
            observed: ObservedState::Absent,
            outputs: Outputs::new(),
            inspect_delay: None,
            reconcile_delay: None,
            transient_inspect_failures: AtomicUsize::new(0),
            transient_reconcile_failures: AtomicUsize::new(0),
            inspect_error: None,
            reconcile_error: None,
            inspect_calls: AtomicUsize::new(0),
            reconcile_calls: AtomicUsize::new(0),
            reconciled: Mutex::new(Vec::new()),
            log: None,
        }
    }

    pub(crate) fn desired(mut self, desired: Desired) -> Self {
        self.desired = desired;
        self
    }

    pub(crate) fn observed(mut self, observed: ObservedState) -> Self {
        self.observed = observed;
        self
    }

    /// Marks the remote resource as already matching the desired state.
    pub(crate) fn up_to_date(mut self) -> Self {
        if let Desired::Managed(state) = &self.desired {
            self.observed = ObservedState::present(state.attributes.clone());
        }
        self
    }

    pub(crate) fn outputs(mut self, outputs: &[(&str, &str)]) -> Self {
        self.outputs = outputs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        self
    }

    pub(crate) const fn inspect_delay(mut self, delay: Duration) -> Self {
        self.inspect_delay = Some(delay);
        self
    }

    pub(crate) const fn reconcile_delay(mut self, delay: Duration) -> Self {
        self.reconcile_delay = Some(delay);
        self
    }

    pub(crate) fn fail_inspect(mut self, message: &str) -> Self {
        self.inspect_error = Some(message.to_string());
        self
    }

    pub(crate) fn fail_inspect_transiently(self, times: usize) -> Self {
        self.transient_inspect_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(crate) fn fail_reconcile(mut self, message: &str) -> Self {
        self.reconcile_error = Some(message.to_string());
        self
    }

    pub(crate) fn fail_reconcile_transiently(self, times: usize) -> Self {
        self.transient_reconcile_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(crate) fn log(mut self, log: &CallLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub(crate) fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reconcile_calls(&self) -> usize {
        self.reconcile_calls.load(Ordering::SeqCst)
    }

    /// Desired states passed to `reconcile`, already resolved.
    pub(crate) fn reconciled(&self) -> Vec<DesiredState> {
        self.reconciled.lock().unwrap().clone()
    }

    fn transient(&self, counter: &AtomicUsize) -> Option<DriverError> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .ok()
            .map(|_| DriverError::CommandFailed {
                command: format!("fake {}", self.section),
                status: 1,
                stderr: String::from("503 UNAVAILABLE"),
            })
    }

    fn failure(&self, message: &str) -> DriverError {
        DriverError::CommandFailed {
            command: format!("fake {}", self.section),
            status: 1,
            stderr: message.to_string(),
        }
    }
}

#[async_trait]
impl ResourceDriver for FakeDriver {
    fn section(&self) -> SectionName {
        self.section
    }

    fn desired_state(&self, _config: &ConfigStore) -> ConfigResult<Desired> {
        Ok(self.desired.clone())
    }

    async fn inspect(&self, _desired: &DesiredState) -> Result<ObservedState, DriverError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.inspect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.transient(&self.transient_inspect_failures) {
            return Err(err);
        }
        if let Some(message) = &self.inspect_error {
            return Err(self.failure(message));
        }
        Ok(self.observed.clone())
    }

    async fn reconcile(
        &self,
        desired: &DesiredState,
        _context: &BuildContext,
    ) -> Result<Outputs, DriverError> {
        self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.section);
        }
        self.reconciled.lock().unwrap().push(desired.clone());
        if let Some(delay) = self.reconcile_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.transient(&self.transient_reconcile_failures) {
            return Err(err);
        }
        if let Some(message) = &self.reconcile_error {
            return Err(self.failure(message));
        }
        Ok(self.outputs.clone())
    }
}

/// Driver set over fakes, keeping handles for assertions.
pub(crate) fn fake_set(drivers: Vec<FakeDriver>) -> (DriverSet, Vec<Arc<FakeDriver>>) {
    let mut set = DriverSet::new();
    let handles: Vec<_> = drivers.into_iter().map(Arc::new).collect();
    for driver in &handles {
        set.insert(Arc::clone(driver) as Arc<dyn ResourceDriver>);
    }
    (set, handles)
}
