//! Resource drivers.
//!
//! One [`ResourceDriver`] per section turns configuration into a desired
//! state, inspects the matching remote resource, and reconciles it. The
//! planner and executor only see the trait.

mod artifact;
mod bigquery;
mod cloud_run;
pub mod command;
mod firebase;
mod frontend;
mod gcloud;
mod health;
mod progress;
mod secrets;
mod sql;
mod storage;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigStore, MASK, RuntimeSettings, keys};
use crate::error::{ConfigResult, DriverError};
use crate::sections::SectionName;

pub use artifact::{ImageBuilder, image_url};
pub use bigquery::BigQueryDriver;
pub use cloud_run::{CloudRunJobDriver, CloudRunServiceDriver};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use firebase::FirebaseDriver;
pub use frontend::{BUILD_MARKER, FrontendDriver};
pub use gcloud::{Gcloud, required_apis};
pub use health::{HealthChecker, HealthStatus, join_url};
pub use secrets::SecretsDriver;
pub use sql::CloudSqlDriver;
pub use storage::StorageDriver;

/// A desired or observed attribute value.
#[derive(Clone, PartialEq, Eq)]
pub enum Attribute {
    /// A plain value, safe to print.
    Plain(String),
    /// A raw secret value; never printed.
    Secret(String),
    /// SHA-256 digest of a remote secret; never printed.
    Digest(String),
    /// Reference to an output of an earlier section, e.g. `backend.url`.
    Output(String),
}

impl Attribute {
    /// Plain attribute.
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self::Plain(value.into())
    }

    /// Returns true if the value must be masked when rendered.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Secret(_) | Self::Digest(_))
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => f.write_str(value),
            Self::Secret(_) | Self::Digest(_) => f.write_str(MASK),
            Self::Output(reference) => write!(f, "(output of {reference})"),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Self::Secret(_) => f.debug_tuple("Secret").field(&MASK).finish(),
            Self::Digest(_) => f.debug_tuple("Digest").field(&MASK).finish(),
            Self::Output(reference) => f.debug_tuple("Output").field(reference).finish(),
        }
    }
}

/// Named attributes, ordered by name.
pub type Attributes = BTreeMap<String, Attribute>;

/// Values a reconcile step hands to later sections.
pub type Outputs = BTreeMap<String, String>;

/// Desired state of one section's resource, derived only from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    /// Human readable resource identifier.
    pub resource: String,
    /// Attributes compared against the remote resource.
    pub attributes: Attributes,
    /// Inputs the driver needs that are not part of the remote resource
    /// (source directories, build commands).
    pub params: BTreeMap<String, String>,
}

impl DesiredState {
    /// Creates a desired state with no attributes.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attributes: Attributes::new(),
            params: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Adds a plain attribute.
    #[must_use]
    pub fn with_plain(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, Attribute::Plain(value.into()))
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Raw value of a plain or secret attribute.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name)? {
            Attribute::Plain(value) | Attribute::Secret(value) => Some(value),
            Attribute::Digest(_) | Attribute::Output(_) => None,
        }
    }

    /// Raw value of a plain or secret attribute, or a precondition error.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Precondition` if the attribute is missing or
    /// still an unresolved output reference.
    pub fn require(&self, name: &str) -> Result<&str, DriverError> {
        self.value(name).ok_or_else(|| {
            DriverError::precondition(format!("{}: attribute '{name}' is not resolved", self.resource))
        })
    }

    /// Value of a parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// What configuration asks for a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Desired {
    /// The section manages this resource.
    Managed(DesiredState),
    /// The section is enabled but has nothing to manage.
    Unmanaged {
        /// Why, e.g. `BACKEND_IMAGE_NAME is not set`.
        reason: String,
    },
}

/// Live state of a section's resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedState {
    /// The resource does not exist.
    Absent,
    /// The resource exists.
    Present {
        /// Observed attributes, named like the desired ones.
        attributes: Attributes,
        /// Outputs of the existing resource (e.g. its URL).
        outputs: Outputs,
    },
    /// The resource state could not be determined.
    Unknown {
        /// Why inspection failed.
        reason: String,
    },
}

impl ObservedState {
    /// Present state with the given attributes and no outputs.
    #[must_use]
    pub const fn present(attributes: Attributes) -> Self {
        Self::Present {
            attributes,
            outputs: Outputs::new(),
        }
    }

    /// Outputs of a present resource.
    #[must_use]
    pub fn outputs(&self) -> Option<&Outputs> {
        match self {
            Self::Present { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

/// Outputs accumulated from completed sections, keyed `<section>.<key>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    values: BTreeMap<String, String>,
}

impl BuildContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outputs of a section, replacing earlier values.
    pub fn record(&mut self, section: SectionName, outputs: &Outputs) {
        for (key, value) in outputs {
            self.values.insert(format!("{section}.{key}"), value.clone());
        }
    }

    /// Looks up a reference such as `backend.url`.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<&str> {
        self.values.get(reference).map(String::as_str)
    }

    /// All recorded values.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Replaces resolvable output references with their values. Unknown
    /// references are left in place.
    #[must_use]
    pub fn resolve(&self, desired: &DesiredState) -> DesiredState {
        let mut resolved = desired.clone();
        for value in resolved.attributes.values_mut() {
            if let Attribute::Output(reference) = value {
                if let Some(found) = self.get(reference) {
                    *value = Attribute::Plain(found.to_string());
                }
            }
        }
        resolved
    }

    /// Replaces every output reference with its value.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Precondition` naming the first reference no
    /// earlier section produced.
    pub fn resolve_all(&self, desired: &DesiredState) -> Result<DesiredState, DriverError> {
        let resolved = self.resolve(desired);
        for (name, value) in &resolved.attributes {
            if let Attribute::Output(reference) = value {
                return Err(DriverError::precondition(format!(
                    "{name} needs {reference}, which no earlier section produced"
                )));
            }
        }
        Ok(resolved)
    }
}

/// Capability implemented once per section.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Section this driver manages.
    fn section(&self) -> SectionName;

    /// Derives the desired state from configuration alone.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for malformed values.
    fn desired_state(&self, config: &ConfigStore) -> ConfigResult<Desired>;

    /// Reads the remote state. Must not mutate anything.
    ///
    /// # Errors
    ///
    /// Returns a `DriverError` if the state cannot be read.
    async fn inspect(&self, desired: &DesiredState) -> Result<ObservedState, DriverError>;

    /// Moves the remote resource toward `desired`, whose output references
    /// are already resolved. Returns outputs for later sections.
    ///
    /// # Errors
    ///
    /// Returns a `DriverError` if any step fails.
    async fn reconcile(
        &self,
        desired: &DesiredState,
        context: &BuildContext,
    ) -> Result<Outputs, DriverError>;
}

/// Drivers indexed by section.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: BTreeMap<SectionName, Arc<dyn ResourceDriver>>,
}

impl DriverSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a driver, replacing any driver for the same section.
    pub fn insert(&mut self, driver: Arc<dyn ResourceDriver>) {
        self.drivers.insert(driver.section(), driver);
    }

    /// Driver for a section.
    #[must_use]
    pub fn get(&self, section: SectionName) -> Option<&Arc<dyn ResourceDriver>> {
        self.drivers.get(&section)
    }

    /// Builds the Google Cloud drivers for every section.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if run settings are malformed.
    pub fn for_gcp(config: &ConfigStore, runner: Arc<dyn CommandRunner>) -> ConfigResult<Self> {
        let settings = RuntimeSettings::from_config(config)?;
        let gcloud = Arc::new(Gcloud::new(
            runner,
            keys::string(config, keys::GCP_PROJECT_ID),
            keys::string(config, keys::GCP_REGION),
            settings,
        ));
        let root: PathBuf = config.root().to_path_buf();

        let mut set = Self::new();
        set.insert(Arc::new(CloudRunServiceDriver::backend(Arc::clone(&gcloud), &root)));
        set.insert(Arc::new(CloudRunJobDriver::new(Arc::clone(&gcloud), &root)));
        set.insert(Arc::new(BigQueryDriver::new(Arc::clone(&gcloud))));
        set.insert(Arc::new(CloudSqlDriver::new(Arc::clone(&gcloud))));
        set.insert(Arc::new(StorageDriver::new(Arc::clone(&gcloud))));
        set.insert(Arc::new(SecretsDriver::new(Arc::clone(&gcloud))));
        set.insert(Arc::new(FrontendDriver::new(Arc::clone(&gcloud), &root)));
        set.insert(Arc::new(CloudRunServiceDriver::frontend(Arc::clone(&gcloud), &root)));
        set.insert(Arc::new(FirebaseDriver::new(gcloud, &root)));
        Ok(set)
    }
}

impl fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.drivers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_masking() {
        let secret = Attribute::Secret(String::from("p4ssw0rd"));
        assert_eq!(secret.to_string(), MASK);
        assert!(!format!("{secret:?}").contains("p4ssw0rd"));
        assert_eq!(Attribute::plain("x").to_string(), "x");
    }

    #[test]
    fn test_context_resolution() {
        let desired = DesiredState::new("frontend")
            .with("api_url", Attribute::Output(String::from("backend.url")))
            .with_plain("build_command", "npm run build");

        let mut context = BuildContext::new();
        assert!(context.resolve_all(&desired).is_err());
        assert_eq!(context.resolve(&desired), desired);

        let outputs = Outputs::from([(String::from("url"), String::from("https://api.run.app"))]);
        context.record(SectionName::Backend, &outputs);
        let resolved = context.resolve_all(&desired).unwrap();
        assert_eq!(resolved.value("api_url"), Some("https://api.run.app"));
    }

    #[test]
    fn test_gcp_driver_set_covers_every_section() {
        let config = ConfigStore::default();
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let set = DriverSet::for_gcp(&config, runner).unwrap();
        for section in SectionName::ALL {
            let driver = set.get(section).unwrap();
            assert_eq!(driver.section(), section);
        }
    }
}
